//! Handlers for `create` and `delete` ref events.
//!
//! Branch lifecycle only; tag refs are ignored.

use rusqlite::Transaction;
use serde_json::Value;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::store::entities::{delete_branch, upsert_branch};
use crate::store::Result;
use crate::types::RepositoryId;

pub(crate) fn apply_create(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    payload: &Value,
) -> Result<Outcome> {
    let Some((repo, branch)) = branch_target(repo, payload) else {
        return Ok(Outcome::noop());
    };
    // `create` payloads carry no head SHA; the next push fills it in.
    upsert_branch(tx, repo, branch, None, ctx.now_ms)?;
    Ok(Outcome::touched(repo))
}

pub(crate) fn apply_delete(
    tx: &Transaction<'_>,
    _ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    payload: &Value,
) -> Result<Outcome> {
    let Some((repo, branch)) = branch_target(repo, payload) else {
        return Ok(Outcome::noop());
    };
    delete_branch(tx, repo, branch)?;
    Ok(Outcome::touched(repo))
}

fn branch_target<'a>(
    repo: Option<RepositoryId>,
    payload: &'a Value,
) -> Option<(RepositoryId, &'a str)> {
    let repo = repo?;
    if payload::str_at(payload, &["ref_type"]) != Some("branch") {
        return None;
    }
    Some((repo, payload::str_at(payload, &["ref"])?))
}
