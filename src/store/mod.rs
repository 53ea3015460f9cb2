//! SQLite-backed entity store.
//!
//! This module owns every normalized table: domain entities mirrored from
//! GitHub, the raw webhook event queue, dead letters, and the derived
//! projection tables. All mutation flows through [`Store::transact`], so one
//! event's decode-dispatch-upsert-reconcile-project sequence is a single
//! SQLite transaction: either all of it becomes visible or none of it does.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and
//! add a migration in [`schema::run_migrations`]. Migrations run sequentially
//! from the current version to the target version.
//!
//! # Durability
//!
//! The database is configured with:
//! - `journal_mode = WAL` for better concurrency and crash safety
//! - `synchronous = FULL` for maximum durability
//! - `busy_timeout = 5000ms` so overlapping batch ticks back off gracefully

pub mod entities;
pub mod ledger;
pub mod queue;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction};
use thiserror::Error;

use crate::types::{CorrelationId, DeliveryId};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error while preparing the database location.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Duplicate delivery ID (already present in the raw event queue).
    #[error("duplicate delivery ID: {0}")]
    DuplicateDelivery(DeliveryId),

    /// Duplicate correlation ID for a write initiation.
    #[error("duplicate correlation ID: {0}")]
    DuplicateCorrelation(CorrelationId),

    /// The database could not be configured as required.
    #[error("storage configuration: {0}")]
    Config(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns the current wall-clock time as unix milliseconds.
///
/// Remote timestamps (`github_updated_at`) come from payloads; this is only
/// used for local bookkeeping columns (`cached_at`, `updated_at`,
/// `received_at`).
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Handle to the SQLite database.
///
/// Cheap to clone; all clones share one connection behind a mutex. rusqlite
/// is synchronous, so async callers bridge in with `spawn_blocking`.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at the given path and runs migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = Connection::open(path)?;

        // WAL must actually take effect; SQLite can silently stay in DELETE
        // mode on filesystems without shared-memory support. In-memory
        // databases report "memory", which is fine for tests.
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::Config(format!(
                "failed to enable WAL mode: SQLite returned '{journal_mode}'"
            )));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )?;

        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);

        schema::run_migrations(&conn, current_version)?;

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (used throughout the test suite).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Runs `f` inside one SQLite transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`. This
    /// is the unit-of-work seam: every handler receives the transaction as an
    /// explicit parameter rather than reaching for ambient state.
    pub fn transact<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Runs a read-only closure against the raw connection.
    ///
    /// For aggregate queries (health counts, projections reads) that don't
    /// need transactional isolation.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}
