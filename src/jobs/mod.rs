//! Outbound job queue for dependent workflows.
//!
//! Applying an event sometimes means more work than the mirror itself can do
//! inline - syncing collaborator permissions after an installation change,
//! fetching file diffs after a PR head moves. Those are network-bound and
//! belong to external collaborators, so the apply path only *records* them
//! through this interface. Execution is somebody else's loop.

use std::sync::Mutex;

use rusqlite::{params, Transaction};
use serde_json::Value;

use crate::store::Result;

/// Job types the event engine schedules.
pub mod job_type {
    /// Re-sync collaborator permissions for an installation's repositories.
    pub const PERMISSION_SYNC: &str = "permission_sync";
    /// Fetch file diffs for a pull request whose head moved.
    pub const FILE_DIFF_SYNC: &str = "file_diff_sync";
}

/// Sink for jobs scheduled while applying an event.
///
/// Enqueueing takes the apply transaction so a rolled-back event never leaves
/// a scheduled job behind.
pub trait JobQueue: Send + Sync {
    fn enqueue(
        &self,
        tx: &Transaction<'_>,
        job_type: &str,
        payload: &Value,
        delay_ms: i64,
        now_ms: i64,
    ) -> Result<()>;
}

/// Store-backed queue: jobs land in the `outbound_jobs` table, due at
/// `now + delay`.
#[derive(Debug, Default)]
pub struct SqliteJobQueue;

impl JobQueue for SqliteJobQueue {
    fn enqueue(
        &self,
        tx: &Transaction<'_>,
        job_type: &str,
        payload: &Value,
        delay_ms: i64,
        now_ms: i64,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO outbound_jobs (job_type, payload_json, run_after, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_type, payload.to_string(), now_ms + delay_ms, now_ms],
        )?;
        Ok(())
    }
}

/// Test double that records what was enqueued.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    jobs: Mutex<Vec<(String, Value, i64)>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(job_type, payload, delay_ms)` triples, in enqueue order.
    pub fn recorded(&self) -> Vec<(String, Value, i64)> {
        self.jobs.lock().unwrap().clone()
    }
}

impl JobQueue for RecordingJobQueue {
    fn enqueue(
        &self,
        _tx: &Transaction<'_>,
        job_type: &str,
        payload: &Value,
        delay_ms: i64,
        _now_ms: i64,
    ) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .push((job_type.to_string(), payload.clone(), delay_ms));
        Ok(())
    }
}
