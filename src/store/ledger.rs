//! Optimistic write ledger.
//!
//! When the system initiates a write against GitHub (through the external
//! write executor), the affected entity row records the write's lifecycle in
//! embedded `optimistic_*` columns: what operation is in flight, under which
//! correlation id, and whether it is still pending, confirmed by GitHub's own
//! event stream, or failed at the REST call.
//!
//! The ledger is deliberately one-deep: a new write always supersedes the
//! previous ledger regardless of its state. What is rejected is reuse of the
//! same correlation id, which would make two in-flight writes
//! indistinguishable.

use rusqlite::{params, Transaction};

use crate::types::{CorrelationId, IssueNumber, RepositoryId};

use super::{Result, StoreError};

/// Which entity table a ledger lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Issue,
    PullRequest,
}

impl EntityKind {
    fn table(self) -> &'static str {
        match self {
            EntityKind::Issue => "issues",
            EntityKind::PullRequest => "pull_requests",
        }
    }
}

/// Locally-initiated write operations the ledger can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    CreateIssue,
    CreateComment,
    UpdateIssueState,
    MergePullRequest,
    UpdatePullRequestBranch,
    SubmitPrReview,
    UpdateLabels,
    UpdateAssignees,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::CreateIssue => "create_issue",
            OperationType::CreateComment => "create_comment",
            OperationType::UpdateIssueState => "update_issue_state",
            OperationType::MergePullRequest => "merge_pull_request",
            OperationType::UpdatePullRequestBranch => "update_pull_request_branch",
            OperationType::SubmitPrReview => "submit_pr_review",
            OperationType::UpdateLabels => "update_labels",
            OperationType::UpdateAssignees => "update_assignees",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_issue" => Some(OperationType::CreateIssue),
            "create_comment" => Some(OperationType::CreateComment),
            "update_issue_state" => Some(OperationType::UpdateIssueState),
            "merge_pull_request" => Some(OperationType::MergePullRequest),
            "update_pull_request_branch" => Some(OperationType::UpdatePullRequestBranch),
            "submit_pr_review" => Some(OperationType::SubmitPrReview),
            "update_labels" => Some(OperationType::UpdateLabels),
            "update_assignees" => Some(OperationType::UpdateAssignees),
            _ => None,
        }
    }

    /// The table whose row carries this operation's ledger.
    ///
    /// Label/assignee/state updates can target either issues or pull
    /// requests, but the write executor addresses both through the shared
    /// issue number space, so their ledgers live on the issue row unless the
    /// operation is intrinsically PR-only.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            OperationType::CreateIssue
            | OperationType::CreateComment
            | OperationType::UpdateIssueState
            | OperationType::UpdateLabels
            | OperationType::UpdateAssignees => EntityKind::Issue,
            OperationType::MergePullRequest
            | OperationType::UpdatePullRequestBranch
            | OperationType::SubmitPrReview => EntityKind::PullRequest,
        }
    }
}

/// Ledger state of a locally-initiated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Pending,
    Failed,
    Confirmed,
}

impl LedgerState {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerState::Pending => "pending",
            LedgerState::Failed => "failed",
            LedgerState::Confirmed => "confirmed",
        }
    }
}

/// A write initiation, as handed over by the external write executor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WriteInitiation {
    pub correlation_id: CorrelationId,
    pub operation: String,
    pub repository_id: RepositoryId,
    pub entity_number: IssueNumber,
    pub payload_json: String,
}

fn correlation_in_use(tx: &Transaction<'_>, correlation_id: &CorrelationId) -> Result<bool> {
    for table in ["issues", "pull_requests"] {
        let used: bool = tx.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {table} WHERE optimistic_correlation_id = ?1)"
            ),
            params![correlation_id.as_str()],
            |row| row.get(0),
        )?;
        if used {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Records the start of a locally-initiated write.
///
/// Creates the target row if it does not exist yet (a local echo of a create
/// that GitHub has not confirmed), then overwrites the row's ledger with a
/// fresh `pending` entry. A previous ledger in any state is superseded.
///
/// # Errors
///
/// Returns [`StoreError::DuplicateCorrelation`] if the correlation id is
/// already attached to any row. The caller gets this synchronously; nothing
/// touches the event queue.
pub fn begin_write(tx: &Transaction<'_>, init: &WriteInitiation, now_ms: i64) -> Result<()> {
    let Some(operation) = OperationType::parse(&init.operation) else {
        return Err(StoreError::Config(format!(
            "unknown write operation: {}",
            init.operation
        )));
    };

    if correlation_in_use(tx, &init.correlation_id)? {
        return Err(StoreError::DuplicateCorrelation(init.correlation_id.clone()));
    }

    let table = operation.entity_kind().table();

    // Skeleton row for writes against entities the mirror has not seen yet.
    // github_updated_at stays 0 so the first real event always passes the gate.
    tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {table}
                 (repository_id, number, github_updated_at, cached_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)"
        ),
        params![init.repository_id.0, init.entity_number.0, now_ms],
    )?;

    tx.execute(
        &format!(
            "UPDATE {table} SET
                 optimistic_correlation_id = ?3,
                 optimistic_operation = ?4,
                 optimistic_state = 'pending',
                 optimistic_payload_json = ?5,
                 optimistic_error_message = NULL,
                 optimistic_error_status = NULL,
                 optimistic_updated_at = ?6
             WHERE repository_id = ?1 AND number = ?2"
        ),
        params![
            init.repository_id.0,
            init.entity_number.0,
            init.correlation_id.as_str(),
            operation.as_str(),
            init.payload_json,
            now_ms,
        ],
    )?;

    Ok(())
}

/// Marks a pending write as failed, with the error the write executor saw.
///
/// Looked up by correlation id across both ledger-bearing tables. Returns
/// `false` if no pending ledger carries that correlation id (already
/// confirmed, superseded, or never begun).
pub fn mark_failed(
    tx: &Transaction<'_>,
    correlation_id: &CorrelationId,
    error_message: &str,
    error_status: Option<i64>,
    now_ms: i64,
) -> Result<bool> {
    for table in ["issues", "pull_requests"] {
        let changed = tx.execute(
            &format!(
                "UPDATE {table} SET
                     optimistic_state = 'failed',
                     optimistic_error_message = ?2,
                     optimistic_error_status = ?3,
                     optimistic_updated_at = ?4
                 WHERE optimistic_correlation_id = ?1
                   AND optimistic_state = 'pending'"
            ),
            params![correlation_id.as_str(), error_message, error_status, now_ms],
        )?;
        if changed > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Confirms a pending write on the given entity, if its operation matches.
///
/// This is the reconciliation hook the dispatcher calls after successfully
/// applying an event. Confirmation clears error fields and stamps
/// `optimistic_updated_at`. Returns `false` when there is nothing to confirm:
/// no ledger, a ledger in a terminal state, or a ledger for a different
/// operation (that pending ledger is left alone - it belongs to a different
/// in-flight write).
pub fn confirm(
    tx: &Transaction<'_>,
    kind: EntityKind,
    repository_id: RepositoryId,
    number: IssueNumber,
    operation: OperationType,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        &format!(
            "UPDATE {} SET
                 optimistic_state = 'confirmed',
                 optimistic_error_message = NULL,
                 optimistic_error_status = NULL,
                 optimistic_updated_at = ?4
             WHERE repository_id = ?1 AND number = ?2
               AND optimistic_state = 'pending'
               AND optimistic_operation = ?3",
            kind.table()
        ),
        params![repository_id.0, number.0, operation.as_str(), now_ms],
    )?;
    Ok(changed > 0)
}
