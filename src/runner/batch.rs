//! Bounded batch runner.
//!
//! One invocation promotes due retries, pulls up to `batch_size` pending
//! events oldest-first, and feeds them through the controller sequentially.
//! The batch is small on purpose: each event can cost tens of indexed
//! reads/writes, and the hosting environment enforces a per-invocation
//! compute ceiling. Installation-lifecycle events bulk-insert or bulk-delete
//! repositories, so one of those ends the batch early.
//!
//! The runner keeps no state between invocations; cadence belongs to the
//! caller (a timer tick, a cron, a test loop).

use tracing::{error, info};

use crate::events;
use crate::jobs::JobQueue;
use crate::store::queue::pull_pending;
use crate::store::{now_ms, Result, Store};

use super::backoff::BackoffConfig;
use super::controller::{process_event, ProcessOutcome};

/// Batch runner tunables.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum events pulled per invocation.
    pub batch_size: usize,

    /// Retry policy applied per event.
    pub backoff: BackoffConfig,
}

impl BatchConfig {
    pub const DEFAULT: Self = Self {
        batch_size: 10,
        backoff: BackoffConfig::DEFAULT,
    };
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What one batch invocation did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub promoted: usize,
    pub pulled: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// True when a heavy event ended the batch before the pull was drained.
    pub short_circuited: bool,
}

/// Runs one batch at the current wall-clock time.
pub fn run_batch(store: &Store, jobs: &dyn JobQueue, config: &BatchConfig) -> Result<BatchReport> {
    run_batch_at(store, jobs, config, now_ms())
}

/// Runs one batch at an explicit time (tests drive this directly).
pub fn run_batch_at(
    store: &Store,
    jobs: &dyn JobQueue,
    config: &BatchConfig,
    now_ms: i64,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    report.promoted = store.transact(|tx| crate::store::queue::promote_due_retries(tx, now_ms))?;
    let batch = store.transact(|tx| pull_pending(tx, config.batch_size))?;
    report.pulled = batch.len();

    for event in &batch {
        let heavy = events::is_heavy(&event.event_name);

        match process_event(store, jobs, &config.backoff, event, now_ms) {
            Ok(ProcessOutcome::Processed) => report.processed += 1,
            Ok(ProcessOutcome::Retried { .. }) => report.retried += 1,
            Ok(ProcessOutcome::DeadLettered) => report.dead_lettered += 1,
            Err(bookkeeping_error) => {
                // Even the failure record could not be written. The event is
                // still pending; a later invocation retries it. Nothing here
                // may take down the rest of the batch.
                error!(
                    delivery = %event.delivery_id,
                    error = %bookkeeping_error,
                    "failed to record event outcome"
                );
            }
        }

        if heavy {
            let handled = report.processed + report.retried + report.dead_lettered;
            report.short_circuited = report.pulled > handled;
            break;
        }
    }

    if report.pulled > 0 {
        info!(
            pulled = report.pulled,
            processed = report.processed,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            promoted = report.promoted,
            short_circuited = report.short_circuited,
            "batch complete"
        );
    }
    Ok(report)
}
