//! Event dispatch: decoding raw webhook payloads and applying them to the
//! entity store.
//!
//! Routing is a total function over event names: every name the engine knows
//! goes to a handler, and everything else is a successful no-op, so the queue
//! always drains. Handlers decode defensively (a missing or mistyped field is
//! absent, never fatal) and perform idempotent, timestamp-gated upserts.
//!
//! [`apply_event`] runs inside the caller's transaction and performs the full
//! sequence for one event: mirror the repository and sender rows, run the
//! per-type handler, then - only on success - the optimistic-write
//! reconciliation check, the projection rebuild, and the activity-feed
//! append. If any step fails the transaction rolls back and the event is
//! retried as a unit.

pub mod handlers;
pub mod payload;

use rusqlite::Transaction;
use serde_json::Value;
use tracing::{debug, trace};

use crate::jobs::JobQueue;
use crate::projection::{self, FeedEntry};
use crate::reconcile;
use crate::store::entities::{upsert_repository, upsert_user, RepositoryPatch};
use crate::store::Result;
use crate::types::RepositoryId;

/// Event names this engine handles. Everything else is a no-op success.
pub const HANDLED_EVENTS: &[&str] = &[
    "issues",
    "pull_request",
    "issue_comment",
    "push",
    "pull_request_review",
    "pull_request_review_comment",
    "check_run",
    "workflow_run",
    "workflow_job",
    "create",
    "delete",
    "installation",
    "installation_repositories",
    "member",
];

pub fn is_handled(event_name: &str) -> bool {
    HANDLED_EVENTS.contains(&event_name)
}

/// Installation-lifecycle events bulk-insert or bulk-delete repositories and
/// are capped at one per batch.
pub fn is_heavy(event_name: &str) -> bool {
    matches!(event_name, "installation" | "installation_repositories")
}

/// Shared context threaded through handlers.
pub struct ApplyCtx<'a> {
    pub jobs: &'a dyn JobQueue,
    pub now_ms: i64,
}

/// What applying one event did, for the post-apply steps.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Repository whose projections must be rebuilt.
    pub repository_id: Option<RepositoryId>,
    /// Feed entry to append, when the event maps to a displayable action.
    pub feed: Option<FeedEntry>,
}

impl Outcome {
    pub fn noop() -> Self {
        Outcome::default()
    }

    pub fn touched(repository_id: RepositoryId) -> Self {
        Outcome {
            repository_id: Some(repository_id),
            feed: None,
        }
    }

    pub fn with_feed(mut self, feed: FeedEntry) -> Self {
        self.feed = Some(feed);
        self
    }
}

/// Applies one raw event inside the caller's transaction.
pub fn apply_event(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    event_name: &str,
    action: Option<&str>,
    payload_json: &str,
    repository_id: Option<i64>,
    installation_id: Option<i64>,
) -> Result<Outcome> {
    let payload: Value = match serde_json::from_str(payload_json) {
        Ok(value) => value,
        Err(error) => {
            // Treated as a payload with no readable fields, not a failure.
            debug!(event = event_name, %error, "payload is not valid JSON");
            Value::Null
        }
    };

    let repo = repository_id
        .map(RepositoryId)
        .or_else(|| payload::i64_at(&payload, &["repository", "id"]).map(RepositoryId));

    // Mirror the envelope rows every event carries before type-specific work.
    if let Some(repo) = repo {
        mirror_envelope(tx, ctx, repo, installation_id, &payload)?;
    }

    let outcome = match event_name {
        "issues" => handlers::issues::apply(tx, ctx, repo, action, &payload)?,
        "pull_request" => handlers::pull_request::apply(tx, ctx, repo, action, &payload)?,
        "issue_comment" => handlers::comment::apply_issue_comment(tx, ctx, repo, action, &payload)?,
        "pull_request_review_comment" => {
            handlers::comment::apply_review_comment(tx, ctx, repo, action, &payload)?
        }
        "pull_request_review" => handlers::review::apply(tx, ctx, repo, action, &payload)?,
        "push" => handlers::push::apply(tx, ctx, repo, &payload)?,
        "check_run" => handlers::checks::apply_check_run(tx, ctx, repo, action, &payload)?,
        "workflow_run" => handlers::checks::apply_workflow_run(tx, ctx, repo, action, &payload)?,
        "workflow_job" => handlers::checks::apply_workflow_job(tx, ctx, repo, &payload)?,
        "create" => handlers::lifecycle::apply_create(tx, ctx, repo, &payload)?,
        "delete" => handlers::lifecycle::apply_delete(tx, ctx, repo, &payload)?,
        "installation" => handlers::installation::apply_installation(tx, ctx, action, &payload)?,
        "installation_repositories" => {
            handlers::installation::apply_installation_repositories(tx, ctx, &payload)?
        }
        "member" => handlers::member::apply(tx, ctx, repo, action, &payload)?,
        other => {
            trace!(event = other, "unhandled event name, draining as no-op");
            Outcome::noop()
        }
    };

    // Post-apply steps run only when the handler succeeded; a handler error
    // has already aborted this function and will roll the transaction back.
    if let Some(repo) = repo {
        reconcile::confirm_for_event(tx, repo, event_name, action, &payload, ctx.now_ms)?;
    }
    if let Some(touched) = outcome.repository_id {
        projection::rebuild(tx, touched, ctx.now_ms)?;
        if let Some(feed) = &outcome.feed {
            projection::append_activity_entry(tx, touched, installation_id, feed, ctx.now_ms)?;
        }
    }

    Ok(outcome)
}

/// Upserts the repository and sender rows present on (nearly) every payload.
fn mirror_envelope(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: RepositoryId,
    installation_id: Option<i64>,
    payload: &Value,
) -> Result<()> {
    if let (Some(owner), Some(name)) = (
        payload::str_at(payload, &["repository", "owner", "login"]),
        payload::str_at(payload, &["repository", "name"]),
    ) {
        upsert_repository(
            tx,
            &RepositoryPatch {
                github_id: repo.0,
                owner: owner.to_string(),
                name: name.to_string(),
                installation_id,
                default_branch: payload::str_at(payload, &["repository", "default_branch"])
                    .map(str::to_string),
                private: payload::bool_at(payload, &["repository", "private"]),
            },
            ctx.now_ms,
        )?;
    }

    if let Some(sender) = payload::user_at(payload, &["sender"]) {
        upsert_user(tx, &sender, ctx.now_ms)?;
    }

    Ok(())
}
