//! Raw webhook event queue.
//!
//! One row per inbound delivery. A delivery progresses through states:
//!
//! ```text
//! pending   - enqueued, waiting for a batch runner tick
//! retry     - handler failed, waiting for next_retry_at to elapse
//! processed - applied successfully (row retained for audit)
//! failed    - quarantined by operator action; never set by the engine
//! ```
//!
//! Exhausted deliveries are copied into `dead_letters` and removed from the
//! queue in the same transaction, so "in the queue" and "dead" are mutually
//! exclusive.
//!
//! # Deduplication
//!
//! GitHub delivery ids are unique per delivery. Redeliveries of the same
//! delivery id are rejected at enqueue time; redeliveries under a *new*
//! delivery id are handled downstream by idempotent application.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::types::DeliveryId;

use super::{Result, StoreError};

/// Processing state of a raw event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Pending,
    Retry,
    Processed,
    Failed,
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Pending => "pending",
            ProcessState::Retry => "retry",
            ProcessState::Processed => "processed",
            ProcessState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProcessState::Pending),
            "retry" => Some(ProcessState::Retry),
            "processed" => Some(ProcessState::Processed),
            "failed" => Some(ProcessState::Failed),
            _ => None,
        }
    }
}

/// An inbound webhook delivery, as handed over by the receiver boundary.
///
/// Signature verification has already happened upstream; by the time an
/// event reaches this contract it is trusted but not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InboundEvent {
    pub delivery_id: DeliveryId,
    pub event_name: String,
    pub action: Option<String>,
    pub payload_json: String,
    pub repository_id: Option<i64>,
    pub installation_id: Option<i64>,
    pub received_at: i64,
}

/// A raw event row pulled from the queue.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub id: i64,
    pub delivery_id: DeliveryId,
    pub event_name: String,
    pub action: Option<String>,
    pub payload_json: String,
    pub repository_id: Option<i64>,
    pub installation_id: Option<i64>,
    pub process_state: ProcessState,
    pub process_attempts: i64,
    pub process_error: Option<String>,
    pub next_retry_at: Option<i64>,
    pub received_at: i64,
}

fn row_to_raw_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    let state: String = row.get(7)?;
    Ok(RawEvent {
        id: row.get(0)?,
        delivery_id: DeliveryId(row.get(1)?),
        event_name: row.get(2)?,
        action: row.get(3)?,
        payload_json: row.get(4)?,
        repository_id: row.get(5)?,
        installation_id: row.get(6)?,
        process_state: ProcessState::parse(&state).unwrap_or(ProcessState::Failed),
        process_attempts: row.get(8)?,
        process_error: row.get(9)?,
        next_retry_at: row.get(10)?,
        received_at: row.get(11)?,
    })
}

const RAW_EVENT_COLUMNS: &str = "id, delivery_id, event_name, action, payload_json, \
     repository_id, installation_id, process_state, process_attempts, \
     process_error, next_retry_at, received_at";

/// Enqueues an inbound delivery in `pending` state.
///
/// # Errors
///
/// Returns [`StoreError::DuplicateDelivery`] if a row with the same delivery
/// id already exists (in any state - a processed row still blocks re-enqueue
/// of the same delivery).
pub fn enqueue(tx: &Transaction<'_>, event: &InboundEvent) -> Result<i64> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM raw_events WHERE delivery_id = ?1)",
        params![event.delivery_id.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        return Err(StoreError::DuplicateDelivery(event.delivery_id.clone()));
    }

    tx.execute(
        "INSERT INTO raw_events (delivery_id, event_name, action, payload_json,
                                 repository_id, installation_id, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.delivery_id.as_str(),
            event.event_name,
            event.action,
            event.payload_json,
            event.repository_id,
            event.installation_id,
            event.received_at,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Pulls up to `limit` pending events, oldest first.
pub fn pull_pending(tx: &Transaction<'_>, limit: usize) -> Result<Vec<RawEvent>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {RAW_EVENT_COLUMNS} FROM raw_events
         WHERE process_state = 'pending'
         ORDER BY received_at, id
         LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit as i64], row_to_raw_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Looks up a raw event by delivery id.
pub fn get_by_delivery(tx: &Transaction<'_>, delivery_id: &DeliveryId) -> Result<Option<RawEvent>> {
    let event = tx
        .query_row(
            &format!("SELECT {RAW_EVENT_COLUMNS} FROM raw_events WHERE delivery_id = ?1"),
            params![delivery_id.as_str()],
            row_to_raw_event,
        )
        .optional()?;
    Ok(event)
}

/// Marks an event as successfully processed. The row is retained for audit.
pub fn mark_processed(tx: &Transaction<'_>, id: i64, now_ms: i64) -> Result<()> {
    tx.execute(
        "UPDATE raw_events
         SET process_state = 'processed', process_error = NULL,
             next_retry_at = NULL, processed_at = ?2
         WHERE id = ?1",
        params![id, now_ms],
    )?;
    Ok(())
}

/// Parks an event for retry with the given attempt count and due time.
pub fn mark_retry(
    tx: &Transaction<'_>,
    id: i64,
    attempts: i64,
    error: &str,
    next_retry_at: i64,
) -> Result<()> {
    tx.execute(
        "UPDATE raw_events
         SET process_state = 'retry', process_attempts = ?2,
             process_error = ?3, next_retry_at = ?4
         WHERE id = ?1",
        params![id, attempts, error, next_retry_at],
    )?;
    Ok(())
}

/// Moves an exhausted event into the dead-letter table and removes it from
/// the active queue. Both happen in the caller's transaction, so the event is
/// never visible in both places.
pub fn dead_letter(
    tx: &Transaction<'_>,
    event: &RawEvent,
    reason: &str,
    source: &str,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO dead_letters (delivery_id, reason, payload_json, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.delivery_id.as_str(),
            reason,
            event.payload_json,
            source,
            now_ms
        ],
    )?;
    tx.execute("DELETE FROM raw_events WHERE id = ?1", params![event.id])?;
    Ok(())
}

/// Promotes `retry` events whose due time has elapsed back to `pending`.
///
/// Idempotent: a row that already left `retry` state is untouched, and
/// running the sweep twice is a no-op the second time.
pub fn promote_due_retries(tx: &Transaction<'_>, now_ms: i64) -> Result<usize> {
    let promoted = tx.execute(
        "UPDATE raw_events
         SET process_state = 'pending', next_retry_at = NULL
         WHERE process_state = 'retry' AND next_retry_at IS NOT NULL
           AND next_retry_at <= ?1",
        params![now_ms],
    )?;
    Ok(promoted)
}

/// A dead-letter row, for operator inspection. There is no automatic replay.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: i64,
    pub delivery_id: DeliveryId,
    pub reason: String,
    pub payload_json: String,
    pub source: String,
    pub created_at: i64,
}

/// Lists dead letters, newest first.
pub fn list_dead_letters(tx: &Transaction<'_>, limit: usize) -> Result<Vec<DeadLetter>> {
    let mut stmt = tx.prepare(
        "SELECT id, delivery_id, reason, payload_json, source, created_at
         FROM dead_letters ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(DeadLetter {
            id: row.get(0)?,
            delivery_id: DeliveryId(row.get(1)?),
            reason: row.get(2)?,
            payload_json: row.get(3)?,
            source: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    let mut letters = Vec::new();
    for row in rows {
        letters.push(row?);
    }
    Ok(letters)
}
