//! Runtime configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::runner::{BackoffConfig, BatchConfig};

/// Default interval between batch runner ticks.
const DEFAULT_TICK_SECS: u64 = 5;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database.
    pub db_path: PathBuf,

    /// Address the HTTP shell binds to.
    pub bind_addr: SocketAddr,

    /// Batch runner tunables.
    pub batch: BatchConfig,

    /// Interval between batch runner ticks.
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("hubcache.db"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            batch: BatchConfig::DEFAULT,
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECS),
        }
    }
}

impl Config {
    /// Reads configuration from `HUBCACHE_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let db_path = std::env::var("HUBCACHE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let bind_addr = std::env::var("HUBCACHE_BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.bind_addr);
        let batch_size = std::env::var("HUBCACHE_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch.batch_size);
        let max_attempts = std::env::var("HUBCACHE_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch.backoff.max_attempts);
        let base_ms = std::env::var("HUBCACHE_BACKOFF_BASE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch.backoff.base.as_millis() as u64);
        let tick_secs = std::env::var("HUBCACHE_TICK_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TICK_SECS);

        Config {
            db_path,
            bind_addr,
            batch: BatchConfig {
                batch_size,
                backoff: BackoffConfig::new(Duration::from_millis(base_ms), max_attempts),
            },
            tick_interval: Duration::from_secs(tick_secs),
        }
    }
}
