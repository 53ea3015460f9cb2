//! Handlers for CI events: `check_run`, `workflow_run`, `workflow_job`.
//!
//! All three are keyed by the GitHub-assigned run/job id. Their payloads
//! carry timestamps in slightly different places; the freshest available one
//! feeds the update gate.

use rusqlite::Transaction;
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::projection::FeedEntry;
use crate::store::entities::{
    upsert_check_run, upsert_workflow_job, upsert_workflow_run, CheckRunPatch, WorkflowJobPatch,
    WorkflowRunPatch,
};
use crate::store::Result;
use crate::types::RepositoryId;

pub(crate) fn apply_check_run(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(check_id) = payload::i64_at(payload, &["check_run", "id"]) else {
        debug!("check_run event without check_run.id");
        return Ok(Outcome::noop());
    };

    let name = payload::str_at(payload, &["check_run", "name"]);
    let conclusion = payload::str_at(payload, &["check_run", "conclusion"]);
    let patch = CheckRunPatch {
        github_id: check_id,
        name: name.map(str::to_string),
        head_sha: payload::str_at(payload, &["check_run", "head_sha"]).map(str::to_string),
        status: payload::str_at(payload, &["check_run", "status"]).map(str::to_string),
        conclusion: conclusion.map(str::to_string),
        details_url: payload::str_at(payload, &["check_run", "details_url"]).map(str::to_string),
    };
    let remote_ts = payload::timestamp_at(payload, &["check_run", "completed_at"])
        .or_else(|| payload::timestamp_at(payload, &["check_run", "started_at"]))
        .unwrap_or(0);
    upsert_check_run(tx, repo, &patch, remote_ts, ctx.now_ms)?;

    let feed = (action == Some("completed") && conclusion.is_some()).then(|| FeedEntry {
        kind: "check_completed".to_string(),
        title: format!(
            "{}: {}",
            name.unwrap_or("check"),
            conclusion.unwrap_or_default()
        ),
        description: None,
        actor_login: None,
        actor_avatar_url: None,
        entity_number: None,
    });

    Ok(match feed {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}

pub(crate) fn apply_workflow_run(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(run_id) = payload::i64_at(payload, &["workflow_run", "id"]) else {
        debug!("workflow_run event without workflow_run.id");
        return Ok(Outcome::noop());
    };

    let name = payload::str_at(payload, &["workflow_run", "name"]);
    let conclusion = payload::str_at(payload, &["workflow_run", "conclusion"]);
    let patch = WorkflowRunPatch {
        github_id: run_id,
        name: name.map(str::to_string),
        head_branch: payload::str_at(payload, &["workflow_run", "head_branch"])
            .map(str::to_string),
        head_sha: payload::str_at(payload, &["workflow_run", "head_sha"]).map(str::to_string),
        status: payload::str_at(payload, &["workflow_run", "status"]).map(str::to_string),
        conclusion: conclusion.map(str::to_string),
        run_number: payload::i64_at(payload, &["workflow_run", "run_number"]),
    };
    let remote_ts = payload::timestamp_at(payload, &["workflow_run", "updated_at"]).unwrap_or(0);
    upsert_workflow_run(tx, repo, &patch, remote_ts, ctx.now_ms)?;

    let feed = (action == Some("completed") && conclusion.is_some()).then(|| FeedEntry {
        kind: "workflow_completed".to_string(),
        title: format!(
            "{}: {}",
            name.unwrap_or("workflow"),
            conclusion.unwrap_or_default()
        ),
        description: payload::str_at(payload, &["workflow_run", "head_branch"])
            .map(str::to_string),
        actor_login: None,
        actor_avatar_url: None,
        entity_number: None,
    });

    Ok(match feed {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}

pub(crate) fn apply_workflow_job(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(job_id) = payload::i64_at(payload, &["workflow_job", "id"]) else {
        debug!("workflow_job event without workflow_job.id");
        return Ok(Outcome::noop());
    };

    let patch = WorkflowJobPatch {
        github_id: job_id,
        run_id: payload::i64_at(payload, &["workflow_job", "run_id"]),
        name: payload::str_at(payload, &["workflow_job", "name"]).map(str::to_string),
        status: payload::str_at(payload, &["workflow_job", "status"]).map(str::to_string),
        conclusion: payload::str_at(payload, &["workflow_job", "conclusion"]).map(str::to_string),
    };
    let remote_ts = payload::timestamp_at(payload, &["workflow_job", "completed_at"])
        .or_else(|| payload::timestamp_at(payload, &["workflow_job", "started_at"]))
        .unwrap_or(0);
    upsert_workflow_job(tx, repo, &patch, remote_ts, ctx.now_ms)?;

    // Jobs are too granular for the feed; the parent run covers them.
    Ok(Outcome::touched(repo))
}
