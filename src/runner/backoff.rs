//! Exponential backoff with jitter for failed event applications.
//!
//! The delay for the `n`-th failed attempt (1-based) is
//!
//! ```text
//! delay = base * 2^(n-1) * (1 + jitter),   jitter ~ U(0, 0.25)
//! ```
//!
//! The jitter keeps redelivered batches from retrying in lockstep after a
//! shared failure (a store outage hits every in-flight event at once). The
//! jitter value is sampled by the caller and passed in, so the growth law
//! stays a pure function.

use std::time::Duration;

use rand::Rng;

/// Upper bound of the uniform jitter fraction.
pub const JITTER_MAX: f64 = 0.25;

/// Configuration for retry backoff and exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Base delay multiplied by the exponential factor.
    pub base: Duration,

    /// Total attempts before an event is dead-lettered.
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Default policy: 1s base, 5 attempts (1s, 2s, 4s, 8s between tries).
    pub const DEFAULT: Self = Self {
        base: Duration::from_secs(1),
        max_attempts: 5,
    };

    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Computes the delay after the given failed attempt (1-based), with the
    /// supplied jitter fraction in `[0, JITTER_MAX)`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = (1u64 << exponent) as f64;
        Duration::from_secs_f64(self.base.as_secs_f64() * factor * (1.0 + jitter))
    }

    /// True once `attempt` failures mean the event is out of attempts.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Samples a jitter fraction uniformly from `[0, JITTER_MAX)`.
pub fn sample_jitter() -> f64 {
    rand::thread_rng().gen_range(0.0..JITTER_MAX)
}
