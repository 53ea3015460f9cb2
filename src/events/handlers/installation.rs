//! Handlers for `installation` and `installation_repositories` events.
//!
//! These are the heavy events: an installation change can insert or delete an
//! account's whole repository set in one delivery, so the batch runner caps
//! them at one per batch.
//!
//! A repository can be connected manually before the app is installed; such a
//! row carries the placeholder installation id 0. When the installation event
//! finally arrives, placeholders owned by the installation's account are
//! upgraded in place, matched by account login.

use rusqlite::{params, Transaction};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::jobs::job_type;
use crate::store::entities::{
    delete_installation, upgrade_placeholder_installation, upsert_installation, upsert_repository,
    RepositoryPatch,
};
use crate::store::Result;

pub(crate) fn apply_installation(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(installation_id) = payload::i64_at(payload, &["installation", "id"]) else {
        debug!("installation event without installation.id");
        return Ok(Outcome::noop());
    };
    let account_login = payload::str_at(payload, &["installation", "account", "login"]);

    match action {
        Some("deleted") => {
            // Bulk delete: the installation's repository set goes with it.
            let removed = tx.execute(
                "DELETE FROM repositories WHERE installation_id = ?1",
                params![installation_id],
            )?;
            delete_installation(tx, installation_id)?;
            info!(installation_id, removed, "installation deleted");
        }
        Some("suspend") | Some("unsuspend") => {
            if let Some(login) = account_login {
                upsert_installation(
                    tx,
                    installation_id,
                    login,
                    payload::i64_at(payload, &["installation", "account", "id"]),
                    action == Some("suspend"),
                    ctx.now_ms,
                )?;
            }
        }
        _ => {
            // created, new_permissions_accepted, and anything GitHub adds
            // later: refresh the installation and its repository set.
            let Some(login) = account_login else {
                debug!("installation event without account login");
                return Ok(Outcome::noop());
            };
            upsert_installation(
                tx,
                installation_id,
                login,
                payload::i64_at(payload, &["installation", "account", "id"]),
                false,
                ctx.now_ms,
            )?;

            let added = upsert_repo_set(tx, ctx, installation_id, payload, &["repositories"])?;
            let upgraded =
                upgrade_placeholder_installation(tx, login, installation_id, ctx.now_ms)?;
            info!(installation_id, added, upgraded, "installation synced");

            ctx.jobs.enqueue(
                tx,
                job_type::PERMISSION_SYNC,
                &json!({"installation_id": installation_id}),
                0,
                ctx.now_ms,
            )?;
        }
    }

    Ok(Outcome::noop())
}

pub(crate) fn apply_installation_repositories(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(installation_id) = payload::i64_at(payload, &["installation", "id"]) else {
        debug!("installation_repositories event without installation.id");
        return Ok(Outcome::noop());
    };

    let added = upsert_repo_set(tx, ctx, installation_id, payload, &["repositories_added"])?;

    let mut removed = 0;
    if let Some(gone) = payload::array_at(payload, &["repositories_removed"]) {
        for repo in gone {
            if let Some(id) = repo.get("id").and_then(Value::as_i64) {
                removed += tx.execute(
                    "DELETE FROM repositories WHERE github_id = ?1",
                    params![id],
                )?;
            }
        }
    }
    info!(installation_id, added, removed, "installation repository set changed");

    ctx.jobs.enqueue(
        tx,
        job_type::PERMISSION_SYNC,
        &json!({"installation_id": installation_id}),
        0,
        ctx.now_ms,
    )?;

    Ok(Outcome::noop())
}

/// Upserts each repository in an installation payload list. These lists carry
/// `full_name` ("owner/name") rather than a nested owner object.
fn upsert_repo_set(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    installation_id: i64,
    payload: &Value,
    path: &[&str],
) -> Result<usize> {
    let Some(repos) = payload::array_at(payload, path) else {
        return Ok(0);
    };
    let mut added = 0;
    for repo in repos {
        let Some(id) = repo.get("id").and_then(Value::as_i64) else {
            continue;
        };
        let Some((owner, name)) = repo
            .get("full_name")
            .and_then(Value::as_str)
            .and_then(|full| full.split_once('/'))
        else {
            continue;
        };
        upsert_repository(
            tx,
            &RepositoryPatch {
                github_id: id,
                owner: owner.to_string(),
                name: name.to_string(),
                installation_id: Some(installation_id),
                default_branch: None,
                private: repo.get("private").and_then(Value::as_bool),
            },
            ctx.now_ms,
        )?;
        added += 1;
    }
    Ok(added)
}
