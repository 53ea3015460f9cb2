//! Handlers for `issue_comment` and `pull_request_review_comment` events.
//!
//! Both carry a `comment` object keyed by a global comment id; they differ in
//! where the parent number lives and which flavor the row records. Deletes
//! are unconditional - GitHub does not redeliver deleted comments, so there
//! is no remote timestamp to gate on.

use rusqlite::{params, Transaction};
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::projection::FeedEntry;
use crate::store::entities::{count_comments, delete_comment, upsert_comment, upsert_user, CommentPatch};
use crate::store::Result;
use crate::types::RepositoryId;

pub(crate) fn apply_issue_comment(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    apply_comment(tx, ctx, repo, action, payload, "issue", &["issue", "number"])
}

pub(crate) fn apply_review_comment(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
) -> Result<Outcome> {
    apply_comment(
        tx,
        ctx,
        repo,
        action,
        payload,
        "review",
        &["pull_request", "number"],
    )
}

fn apply_comment(
    tx: &Transaction<'_>,
    ctx: &ApplyCtx<'_>,
    repo: Option<RepositoryId>,
    action: Option<&str>,
    payload: &Value,
    kind: &str,
    number_path: &[&str],
) -> Result<Outcome> {
    let Some(repo) = repo else {
        return Ok(Outcome::noop());
    };
    let Some(comment_id) = payload::i64_at(payload, &["comment", "id"]) else {
        debug!(kind, "comment event without comment.id");
        return Ok(Outcome::noop());
    };
    let number = payload::i64_at(payload, number_path);

    if action == Some("deleted") {
        delete_comment(tx, comment_id)?;
        if let Some(number) = number {
            refresh_comment_count(tx, repo, number)?;
        }
        return Ok(Outcome::touched(repo));
    }

    let Some(number) = number else {
        debug!(kind, "comment event without a parent number");
        return Ok(Outcome::noop());
    };

    let author = payload::user_at(payload, &["comment", "user"]);
    if let Some(author) = &author {
        upsert_user(tx, author, ctx.now_ms)?;
    }

    let patch = CommentPatch {
        github_id: comment_id,
        issue_number: number,
        kind: kind.to_string(),
        body: payload::str_at(payload, &["comment", "body"]).map(str::to_string),
        author_id: author.as_ref().map(|a| a.github_id),
        author_login: author.as_ref().map(|a| a.login.clone()),
    };
    let remote_ts = payload::timestamp_at(payload, &["comment", "updated_at"]).unwrap_or(0);
    upsert_comment(tx, repo, &patch, remote_ts, ctx.now_ms)?;
    refresh_comment_count(tx, repo, number)?;

    let feed = (action == Some("created")).then(|| FeedEntry {
        kind: "comment_created".to_string(),
        title: format!("Comment on #{number}"),
        description: payload::str_at(payload, &["comment", "body"])
            .map(|body| body.chars().take(140).collect()),
        actor_login: author.as_ref().map(|a| a.login.clone()),
        actor_avatar_url: author.and_then(|a| a.avatar_url),
        entity_number: Some(number),
    });

    Ok(match feed {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}

/// Recomputes the denormalized comment counter on the parent issue row, if
/// the mirror has that row. Locally derived, so not timestamp-gated.
fn refresh_comment_count(tx: &Transaction<'_>, repo: RepositoryId, number: i64) -> Result<()> {
    let count = count_comments(tx, repo, number)?;
    tx.execute(
        "UPDATE issues SET comment_count = ?3 WHERE repository_id = ?1 AND number = ?2",
        params![repo.0, number, count],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RecordingJobQueue;
    use crate::store::entities::{get_issue, upsert_issue, IssuePatch};
    use crate::store::Store;
    use crate::types::IssueNumber;
    use serde_json::json;

    const REPO: RepositoryId = RepositoryId(1);

    fn comment_payload(comment_id: i64, issue_number: i64, body: &str) -> Value {
        json!({
            "issue": {"number": issue_number},
            "comment": {
                "id": comment_id,
                "body": body,
                "user": {"id": 9, "login": "commenter"},
                "updated_at": "2024-01-01T00:00:00Z"
            }
        })
    }

    fn run(store: &Store, action: &str, payload: &Value) -> Outcome {
        let jobs = RecordingJobQueue::new();
        store
            .transact(|tx| {
                let ctx = ApplyCtx {
                    jobs: &jobs,
                    now_ms: 1_000,
                };
                apply_issue_comment(tx, &ctx, Some(REPO), Some(action), payload)
            })
            .unwrap()
    }

    #[test]
    fn created_comment_is_stored_and_counted() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                upsert_issue(tx, REPO, IssueNumber(42), &IssuePatch::default(), 100, 0)
            })
            .unwrap();

        let outcome = run(&store, "created", &comment_payload(7, 42, "hello"));
        assert_eq!(outcome.feed.as_ref().unwrap().kind, "comment_created");

        store
            .transact(|tx| {
                let body: String = tx.query_row(
                    "SELECT body FROM comments WHERE github_id = 7",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(body, "hello");
                let issue = get_issue(tx, REPO, IssueNumber(42))?.unwrap();
                assert_eq!(issue.comment_count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn deleted_comment_is_removed_without_timestamp_gate() {
        let store = Store::open_in_memory().unwrap();
        run(&store, "created", &comment_payload(7, 42, "hello"));

        // Delete payloads carry no updated_at; removal is unconditional.
        run(&store, "deleted", &json!({
            "issue": {"number": 42},
            "comment": {"id": 7}
        }));

        let count: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn stale_edit_does_not_regress_body() {
        let store = Store::open_in_memory().unwrap();
        let mut newer = comment_payload(7, 42, "final text");
        newer["comment"]["updated_at"] = json!("2024-06-01T00:00:00Z");
        run(&store, "created", &newer);

        run(&store, "edited", &comment_payload(7, 42, "stale text"));

        let body: String = store
            .read(|conn| {
                Ok(conn.query_row("SELECT body FROM comments WHERE github_id = 7", [], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(body, "final text");
    }

    #[test]
    fn review_comments_attach_to_the_pull_request_number() {
        let store = Store::open_in_memory().unwrap();
        let jobs = RecordingJobQueue::new();
        store
            .transact(|tx| {
                let ctx = ApplyCtx {
                    jobs: &jobs,
                    now_ms: 1_000,
                };
                apply_review_comment(
                    tx,
                    &ctx,
                    Some(REPO),
                    Some("created"),
                    &json!({
                        "pull_request": {"number": 9},
                        "comment": {
                            "id": 50,
                            "body": "inline note",
                            "user": {"id": 9, "login": "commenter"},
                            "updated_at": "2024-01-01T00:00:00Z"
                        }
                    }),
                )
            })
            .unwrap();

        let (number, kind): (i64, String) = store
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT issue_number, kind FROM comments WHERE github_id = 50",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!(number, 9);
        assert_eq!(kind, "review");
    }
}
