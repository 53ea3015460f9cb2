//! Handler for `member` events (collaborator added/edited/removed).

use rusqlite::Transaction;
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::store::entities::{delete_member, upsert_member, upsert_user};
use crate::store::Result;
use crate::types::RepositoryId;

pub(crate) fn apply(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(member) = payload::user_at(payload, &["member"]) else {
        debug!("member event without member.id/login");
        return Ok(Outcome::noop());
    };

    if action == Some("removed") {
        delete_member(tx, repo, member.github_id)?;
        return Ok(Outcome::touched(repo));
    }

    upsert_user(tx, &member, ctx.now_ms)?;
    upsert_member(
        tx,
        repo,
        member.github_id,
        &member.login,
        payload::str_at(payload, &["member", "role_name"]),
        ctx.now_ms,
    )?;
    Ok(Outcome::touched(repo))
}
