//! Optimistic-write reconciliation.
//!
//! After the dispatcher successfully applies an event, it asks this module
//! whether the event closes the loop on a write this system initiated. The
//! matching rule is two-sided: the operation type inferred from
//! `(event_name, action)` must equal the ledger's recorded operation, and the
//! entity the event resolves to must be the row the ledger is attached to.
//!
//! An event that matches nothing is not an error - it is usually somebody
//! else's change arriving through the same firehose.

use rusqlite::Transaction;
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::store::ledger::{self, OperationType};
use crate::store::Result;
use crate::types::{IssueNumber, RepositoryId};

pub use crate::store::ledger::{begin_write, mark_failed, WriteInitiation};

/// Infers the locally-trackable operation a webhook event corresponds to.
///
/// Returns `None` for events that no local write could have produced (pure
/// remote activity such as `push` or `check_run`).
pub fn infer_operation(
    event_name: &str,
    action: Option<&str>,
    payload: &Value,
) -> Option<OperationType> {
    match (event_name, action?) {
        ("issues", "opened") => Some(OperationType::CreateIssue),
        ("issues", "closed") | ("issues", "reopened") => Some(OperationType::UpdateIssueState),
        ("issues", "labeled") | ("issues", "unlabeled") => Some(OperationType::UpdateLabels),
        ("issues", "assigned") | ("issues", "unassigned") => Some(OperationType::UpdateAssignees),
        // PR label/assignee edits go through the shared issue surface, so
        // GitHub reports them as pull_request actions with the same meaning.
        ("pull_request", "labeled") | ("pull_request", "unlabeled") => {
            Some(OperationType::UpdateLabels)
        }
        ("pull_request", "assigned") | ("pull_request", "unassigned") => {
            Some(OperationType::UpdateAssignees)
        }
        ("pull_request", "closed") => {
            // Only a merge is a local operation; a plain close of someone
            // else's PR is not distinguishable from remote activity we track
            // via update_issue_state on the issue surface.
            if payload::bool_at(payload, &["pull_request", "merged"]).unwrap_or(false) {
                Some(OperationType::MergePullRequest)
            } else {
                None
            }
        }
        ("pull_request", "synchronize") => Some(OperationType::UpdatePullRequestBranch),
        ("issue_comment", "created") => Some(OperationType::CreateComment),
        ("pull_request_review", "submitted") => Some(OperationType::SubmitPrReview),
        _ => None,
    }
}

/// Resolves the entity number an event addresses, for ledger matching.
fn resolve_entity(event_name: &str, payload: &Value) -> Option<IssueNumber> {
    let number = match event_name {
        "issues" | "issue_comment" => payload::i64_at(payload, &["issue", "number"]),
        "pull_request" | "pull_request_review" => {
            payload::i64_at(payload, &["pull_request", "number"])
        }
        _ => None,
    }?;
    Some(IssueNumber(number))
}

/// Runs the reconciliation check for one successfully-applied event.
///
/// Returns `true` if a pending ledger was confirmed. A miss (no ledger, a
/// terminal ledger, or an operation mismatch) is silently ignored.
///
/// Review confirmation is heuristic: the ledger cannot tell which reviewer's
/// submission it is waiting for, so any `pull_request_review.submitted` on
/// the PR confirms a pending submit. Concurrent reviews from different actors
/// can therefore misattribute the confirmation.
/// TODO: carry the review's GitHub id back from the write executor so
/// submit_pr_review can match exactly.
pub fn confirm_for_event(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    event_name: &str,
    action: Option<&str>,
    payload: &Value,
    now_ms: i64,
) -> Result<bool> {
    let Some(operation) = infer_operation(event_name, action, payload) else {
        return Ok(false);
    };
    let Some(number) = resolve_entity(event_name, payload) else {
        return Ok(false);
    };

    let confirmed = ledger::confirm(
        tx,
        operation.entity_kind(),
        repository_id,
        number,
        operation,
        now_ms,
    )?;
    if confirmed {
        debug!(
            repo = %repository_id,
            entity = %number,
            operation = operation.as_str(),
            "optimistic write confirmed"
        );
    }
    Ok(confirmed)
}
