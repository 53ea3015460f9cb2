//! Queue health reporting.
//!
//! Read-only aggregate counts for operational visibility: raw events by
//! state, dead letters, and how much was processed in the last hour. The
//! fast path counts through the covering state index; if that index is
//! missing (mid-migration, hand-edited database) the fallback is a linear
//! scan capped at [`SCAN_CAP`] rows - a capped count beats an exact count
//! that can stall the reporter on an unbounded table.

use rusqlite::Connection;
use serde::Serialize;

use crate::store::{now_ms, Result, Store};

/// Ceiling for fallback scans. Counts at this value mean "at least this
/// many".
pub const SCAN_CAP: i64 = 10_000;

/// Window for the recently-processed count.
const RECENT_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Aggregate queue counts. All values are non-negative; when the fallback
/// scan was used they are capped at [`SCAN_CAP`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub pending: i64,
    pub retry: i64,
    pub failed: i64,
    pub dead_letters: i64,
    pub recent_processed: i64,
}

/// Produces the health report at the current wall-clock time.
pub fn report(store: &Store) -> Result<QueueHealth> {
    report_at(store, now_ms())
}

/// Produces the health report with an explicit clock (for tests).
pub fn report_at(store: &Store, now_ms: i64) -> Result<QueueHealth> {
    store.read(|conn| {
        Ok(QueueHealth {
            pending: count_state(conn, "pending")?,
            retry: count_state(conn, "retry")?,
            failed: count_state(conn, "failed")?,
            dead_letters: count_dead_letters(conn)?,
            recent_processed: count_recent_processed(conn, now_ms)?,
        })
    })
}

fn count_state(conn: &Connection, state: &str) -> Result<i64> {
    // Forcing the state index keeps this O(matching rows) over index pages;
    // if the index is unavailable SQLite errors instead of silently scanning,
    // and the capped fallback takes over.
    let indexed = conn.query_row(
        "SELECT COUNT(*) FROM raw_events INDEXED BY idx_raw_events_state
         WHERE process_state = ?1",
        [state],
        |row| row.get(0),
    );
    match indexed {
        Ok(count) => Ok(count),
        Err(_) => Ok(conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM raw_events WHERE process_state = ?1 LIMIT ?2
             )",
            rusqlite::params![state, SCAN_CAP],
            |row| row.get(0),
        )?),
    }
}

fn count_dead_letters(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM (SELECT 1 FROM dead_letters LIMIT ?1)",
        [SCAN_CAP],
        |row| row.get(0),
    )?)
}

fn count_recent_processed(conn: &Connection, now_ms: i64) -> Result<i64> {
    let cutoff = now_ms - RECENT_WINDOW_MS;
    let indexed = conn.query_row(
        "SELECT COUNT(*) FROM (
             SELECT 1 FROM raw_events INDEXED BY idx_raw_events_processed_at
             WHERE processed_at IS NOT NULL AND processed_at >= ?1
             LIMIT ?2
         )",
        rusqlite::params![cutoff, SCAN_CAP],
        |row| row.get(0),
    );
    match indexed {
        Ok(count) => Ok(count),
        Err(_) => Ok(conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM raw_events
                 WHERE processed_at IS NOT NULL AND processed_at >= ?1
                 LIMIT ?2
             )",
            rusqlite::params![cutoff, SCAN_CAP],
            |row| row.get(0),
        )?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::queue::{
        dead_letter, enqueue, get_by_delivery, mark_processed, mark_retry, InboundEvent,
    };
    use crate::types::DeliveryId;

    fn inbound(delivery: &str) -> InboundEvent {
        InboundEvent {
            delivery_id: DeliveryId::new(delivery),
            event_name: "issues".to_string(),
            action: None,
            payload_json: "{}".to_string(),
            repository_id: None,
            installation_id: None,
            received_at: 0,
        }
    }

    #[test]
    fn empty_store_reports_zeros() {
        let store = Store::open_in_memory().unwrap();
        let health = report_at(&store, 1_000).unwrap();
        assert_eq!(
            health,
            QueueHealth {
                pending: 0,
                retry: 0,
                failed: 0,
                dead_letters: 0,
                recent_processed: 0,
            }
        );
    }

    #[test]
    fn counts_cover_every_state() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                enqueue(tx, &inbound("p1"))?;
                enqueue(tx, &inbound("p2"))?;

                let retry_id = enqueue(tx, &inbound("r1"))?;
                mark_retry(tx, retry_id, 1, "boom", 99_999)?;

                let done_id = enqueue(tx, &inbound("ok1"))?;
                mark_processed(tx, done_id, 50_000)?;

                enqueue(tx, &inbound("dead1"))?;
                let dead = get_by_delivery(tx, &DeliveryId::new("dead1"))?.unwrap();
                dead_letter(tx, &dead, "exhausted", "webhook", 50_000)?;
                Ok(())
            })
            .unwrap();

        let health = report_at(&store, 60_000).unwrap();
        assert_eq!(health.pending, 2);
        assert_eq!(health.retry, 1);
        assert_eq!(health.failed, 0);
        assert_eq!(health.dead_letters, 1);
        assert_eq!(health.recent_processed, 1);
    }

    #[test]
    fn recent_processed_window_is_one_hour() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                let old = enqueue(tx, &inbound("old"))?;
                mark_processed(tx, old, 0)?;
                let fresh = enqueue(tx, &inbound("fresh"))?;
                mark_processed(tx, fresh, 3_600_000)?;
                Ok(())
            })
            .unwrap();

        // At t=2h, only the event processed at t=1h is inside the window.
        let health = report_at(&store, 2 * 3_600_000).unwrap();
        assert_eq!(health.recent_processed, 1);
    }

    #[test]
    fn fallback_scan_survives_missing_index() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                enqueue(tx, &inbound("p1"))?;
                Ok(())
            })
            .unwrap();
        store
            .read(|conn| {
                conn.execute("DROP INDEX idx_raw_events_state", [])?;
                Ok(())
            })
            .unwrap();

        let health = report_at(&store, 1_000).unwrap();
        assert_eq!(health.pending, 1);
    }

    #[test]
    fn health_serializes_for_the_http_surface() {
        let health = QueueHealth {
            pending: 1,
            retry: 2,
            failed: 0,
            dead_letters: 3,
            recent_processed: 4,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["pending"], 1);
        assert_eq!(json["dead_letters"], 3);
        assert_eq!(json["recent_processed"], 4);
    }
}
