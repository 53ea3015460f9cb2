//! Handler for `push` events.
//!
//! A push moves a branch head and carries the commits that moved it. Only
//! branch refs are mirrored; tag pushes arrive with a `refs/tags/` ref and
//! are ignored here (tag lifecycle comes through `create`/`delete`, where it
//! is also ignored).

use rusqlite::Transaction;
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::store::entities::{delete_branch, insert_commit, upsert_branch};
use crate::store::Result;
use crate::types::RepositoryId;

pub(crate) fn apply(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    payload: &Value,
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(git_ref) = payload::str_at(payload, &["ref"]) else {
        debug!("push event without ref");
        return Ok(Outcome::noop());
    };
    let Some(branch) = payload::branch_from_ref(git_ref) else {
        // Tag push.
        return Ok(Outcome::noop());
    };

    if payload::bool_at(payload, &["deleted"]).unwrap_or(false) {
        // Deleting a branch the mirror never saw removes zero rows.
        delete_branch(tx, repo, branch)?;
        return Ok(Outcome::touched(repo));
    }

    let head = payload::str_at(payload, &["after"]);
    upsert_branch(tx, repo, branch, head, ctx.now_ms)?;

    if let Some(commits) = payload::array_at(payload, &["commits"]) {
        for commit in commits {
            let Some(sha) = commit.get("id").and_then(Value::as_str) else {
                continue;
            };
            // Push payload authors carry no stable GitHub id; the login text
            // is kept as-is and no user row is linked.
            let author = commit
                .get("author")
                .and_then(|a| a.get("username").or_else(|| a.get("name")))
                .and_then(Value::as_str);
            let authored_at = payload::timestamp_at(commit, &["timestamp"]);
            insert_commit(
                tx,
                repo,
                sha,
                commit.get("message").and_then(Value::as_str),
                author,
                authored_at,
                ctx.now_ms,
            )?;
        }
    }

    Ok(Outcome::touched(repo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RecordingJobQueue;
    use crate::store::entities::get_branch_head;
    use crate::store::Store;
    use serde_json::json;

    const REPO: RepositoryId = RepositoryId(1);

    fn run(store: &Store, payload: &Value) -> Outcome {
        let jobs = RecordingJobQueue::new();
        store
            .transact(|tx| {
                let ctx = ApplyCtx {
                    jobs: &jobs,
                    now_ms: 1_000,
                };
                apply(tx, &ctx, Some(REPO), payload)
            })
            .unwrap()
    }

    #[test]
    fn push_updates_branch_head_and_inserts_commits() {
        let store = Store::open_in_memory().unwrap();
        run(
            &store,
            &json!({
                "ref": "refs/heads/main",
                "after": "f".repeat(40),
                "commits": [
                    {
                        "id": "a".repeat(40),
                        "message": "first",
                        "author": {"name": "Alice", "username": "alice"},
                        "timestamp": "2024-01-01T00:00:00Z"
                    },
                    {
                        "id": "f".repeat(40),
                        "message": "second",
                        "author": {"name": "Bob"}
                    }
                ]
            }),
        );

        store
            .transact(|tx| {
                assert_eq!(
                    get_branch_head(tx, REPO, "main")?.as_deref(),
                    Some(&"f".repeat(40)[..])
                );
                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM commits WHERE repository_id = 1",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(count, 2);
                // Username preferred, name as fallback, never a user-row link.
                let author: String = tx.query_row(
                    "SELECT author_login FROM commits WHERE sha = ?1",
                    [&"a".repeat(40)],
                    |r| r.get(0),
                )?;
                assert_eq!(author, "alice");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleting_unknown_branch_is_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        let outcome = run(
            &store,
            &json!({"ref": "refs/heads/never-seen", "deleted": true}),
        );
        assert_eq!(outcome.repository_id, Some(REPO));

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM branches", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn branch_delete_removes_the_row() {
        let store = Store::open_in_memory().unwrap();
        run(
            &store,
            &json!({"ref": "refs/heads/feature", "after": "a".repeat(40), "commits": []}),
        );
        run(&store, &json!({"ref": "refs/heads/feature", "deleted": true}));

        let head = store
            .transact(|tx| get_branch_head(tx, REPO, "feature"))
            .unwrap();
        assert!(head.is_none());
    }

    #[test]
    fn tag_pushes_are_ignored() {
        let store = Store::open_in_memory().unwrap();
        let outcome = run(
            &store,
            &json!({"ref": "refs/tags/v1.0", "after": "a".repeat(40)}),
        );
        assert!(outcome.repository_id.is_none());
    }

    #[test]
    fn replayed_push_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let payload = json!({
            "ref": "refs/heads/main",
            "after": "a".repeat(40),
            "commits": [{"id": "a".repeat(40), "message": "only"}]
        });
        run(&store, &payload);
        run(&store, &payload);

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM commits", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }
}
