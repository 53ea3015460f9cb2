//! Per-event retry controller.
//!
//! Wraps one event's application in a transaction and turns the result into
//! a queue state transition:
//!
//! ```text
//! pending ── apply ok ──► processed
//! pending ── apply err, attempts < MAX ──► retry (due at now + backoff)
//! pending ── apply err, attempts ≥ MAX ──► dead letter (row removed)
//! ```
//!
//! The apply and its `processed` mark share one transaction, so a crash
//! between them cannot strand a half-applied event. Failure bookkeeping runs
//! in its own transaction after the apply has rolled back.

use tracing::{debug, error, warn};

use crate::events::{self, ApplyCtx};
use crate::jobs::JobQueue;
use crate::store::queue::{self, RawEvent};
use crate::store::{Result, Store};

use super::backoff::{sample_jitter, BackoffConfig};

/// What the controller did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Applied and marked processed.
    Processed,
    /// Handler failed; parked for retry.
    Retried { attempt: u32, next_retry_at: i64 },
    /// Handler failed with attempts exhausted; moved to the dead-letter
    /// table. Terminal - replay is a manual operator action.
    DeadLettered,
}

/// Processes one pulled event.
///
/// Returns `Err` only if the failure *bookkeeping* itself could not be
/// written (store unavailable); the caller should log and move on - the
/// event is still pending and a later tick will pick it up again.
pub fn process_event(
    store: &Store,
    jobs: &dyn JobQueue,
    config: &BackoffConfig,
    event: &RawEvent,
    now_ms: i64,
) -> Result<ProcessOutcome> {
    let applied = store.transact(|tx| {
        let ctx = ApplyCtx { jobs, now_ms };
        events::apply_event(
            tx,
            &ctx,
            &event.event_name,
            event.action.as_deref(),
            &event.payload_json,
            event.repository_id,
            event.installation_id,
        )?;
        queue::mark_processed(tx, event.id, now_ms)?;
        Ok(())
    });

    let apply_error = match applied {
        Ok(()) => {
            debug!(delivery = %event.delivery_id, event = %event.event_name, "event applied");
            return Ok(ProcessOutcome::Processed);
        }
        Err(error) => error,
    };

    // The apply transaction rolled back; record the failure.
    let attempt = (event.process_attempts + 1) as u32;
    let reason = format!("handler failed: {apply_error}");

    if config.is_exhausted(attempt) {
        store.transact(|tx| queue::dead_letter(tx, event, &reason, "webhook", now_ms))?;
        error!(
            delivery = %event.delivery_id,
            event = %event.event_name,
            attempts = attempt,
            error = %apply_error,
            "event dead-lettered"
        );
        Ok(ProcessOutcome::DeadLettered)
    } else {
        let delay = config.delay_for_attempt(attempt, sample_jitter());
        let next_retry_at = now_ms + delay.as_millis() as i64;
        store.transact(|tx| {
            queue::mark_retry(tx, event.id, attempt as i64, &reason, next_retry_at)
        })?;
        warn!(
            delivery = %event.delivery_id,
            event = %event.event_name,
            attempt,
            next_retry_at,
            error = %apply_error,
            "event parked for retry"
        );
        Ok(ProcessOutcome::Retried {
            attempt,
            next_retry_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RecordingJobQueue;
    use crate::store::queue::{enqueue, get_by_delivery, list_dead_letters, InboundEvent, ProcessState};
    use crate::types::DeliveryId;
    use serde_json::json;

    fn issue_event(delivery: &str) -> InboundEvent {
        InboundEvent {
            delivery_id: DeliveryId::new(delivery),
            event_name: "issues".to_string(),
            action: Some("opened".to_string()),
            payload_json: json!({
                "repository": {"id": 1, "name": "r", "owner": {"login": "o"}},
                "issue": {"number": 5, "title": "t", "updated_at": "2024-01-01T00:00:00Z"}
            })
            .to_string(),
            repository_id: Some(1),
            installation_id: None,
            received_at: 0,
        }
    }

    fn pull_one(store: &Store, delivery: &str) -> RawEvent {
        store
            .transact(|tx| get_by_delivery(tx, &DeliveryId::new(delivery)))
            .unwrap()
            .unwrap()
    }

    /// Makes every repo-touching apply fail: the projection rebuild needs
    /// this table inside the same transaction.
    fn break_applies(store: &Store) {
        store
            .read(|conn| {
                conn.execute("DROP TABLE repo_stats", [])?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn success_marks_processed() {
        let store = Store::open_in_memory().unwrap();
        store.transact(|tx| enqueue(tx, &issue_event("d1"))).unwrap();
        let event = pull_one(&store, "d1");

        let jobs = RecordingJobQueue::new();
        let outcome =
            process_event(&store, &jobs, &BackoffConfig::DEFAULT, &event, 1_000).unwrap();
        assert_eq!(outcome, ProcessOutcome::Processed);

        let row = pull_one(&store, "d1");
        assert_eq!(row.process_state, ProcessState::Processed);
        assert!(row.process_error.is_none());
    }

    #[test]
    fn failure_parks_for_retry_with_backoff() {
        let store = Store::open_in_memory().unwrap();
        store.transact(|tx| enqueue(tx, &issue_event("d1"))).unwrap();
        break_applies(&store);
        let event = pull_one(&store, "d1");

        let jobs = RecordingJobQueue::new();
        let config = BackoffConfig::DEFAULT;
        let outcome = process_event(&store, &jobs, &config, &event, 1_000).unwrap();

        let ProcessOutcome::Retried {
            attempt,
            next_retry_at,
        } = outcome
        else {
            panic!("expected retry, got {outcome:?}");
        };
        assert_eq!(attempt, 1);
        // First backoff: 1000ms * (1 + U(0, 0.25)).
        assert!(next_retry_at >= 2_000);
        assert!(next_retry_at < 2_250);

        let row = pull_one(&store, "d1");
        assert_eq!(row.process_state, ProcessState::Retry);
        assert_eq!(row.process_attempts, 1);
        assert!(row.process_error.unwrap().contains("handler failed"));
    }

    #[test]
    fn failed_apply_leaves_no_partial_state() {
        let store = Store::open_in_memory().unwrap();
        store.transact(|tx| enqueue(tx, &issue_event("d1"))).unwrap();
        break_applies(&store);
        let event = pull_one(&store, "d1");

        let jobs = RecordingJobQueue::new();
        process_event(&store, &jobs, &BackoffConfig::DEFAULT, &event, 1_000).unwrap();

        // The issue upsert preceding the projection failure rolled back too.
        let issues: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM issues", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(issues, 0);
    }

    /// Five consecutive failures at MAX_ATTEMPTS=5: the row leaves the queue
    /// and exactly one dead letter exists, carrying the last error.
    #[test]
    fn exhaustion_dead_letters_after_max_attempts() {
        let store = Store::open_in_memory().unwrap();
        store.transact(|tx| enqueue(tx, &issue_event("d1"))).unwrap();
        break_applies(&store);

        let jobs = RecordingJobQueue::new();
        let config = BackoffConfig::DEFAULT;
        let mut now = 1_000i64;
        for attempt in 1..=5u32 {
            // Promote the parked retry (no-op on the first pass).
            store
                .transact(|tx| crate::store::queue::promote_due_retries(tx, now))
                .unwrap();
            let event = pull_one(&store, "d1");
            let outcome = process_event(&store, &jobs, &config, &event, now).unwrap();
            if attempt < 5 {
                assert!(matches!(outcome, ProcessOutcome::Retried { .. }));
            } else {
                assert_eq!(outcome, ProcessOutcome::DeadLettered);
            }
            now += 1_000_000;
        }

        store
            .transact(|tx| {
                assert!(get_by_delivery(tx, &DeliveryId::new("d1"))?.is_none());
                let letters = list_dead_letters(tx, 10)?;
                assert_eq!(letters.len(), 1);
                assert_eq!(letters[0].delivery_id.as_str(), "d1");
                assert!(letters[0].reason.contains("repo_stats"));
                Ok(())
            })
            .unwrap();
    }
}
