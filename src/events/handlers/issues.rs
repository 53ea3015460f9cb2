//! Handler for `issues` events.

use rusqlite::{params, Transaction};
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::projection::FeedEntry;
use crate::store::entities::{upsert_issue, upsert_user, IssuePatch};
use crate::store::Result;
use crate::types::{IssueNumber, RepositoryId};

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
    let Some(number) = payload::i64_at(payload, &["issue", "number"]) else {
        debug!("issues event without issue.number");
        return Ok(Outcome::noop());
    };
    let number = IssueNumber(number);

    // GitHub does not redeliver deleted issues; the delete is unconditional.
    if action == Some("deleted") {
        tx.execute(
            "DELETE FROM issues WHERE repository_id = ?1 AND number = ?2",
            params![repo.0, number.0],
        )?;
        return Ok(Outcome::touched(repo));
    }

    let author = payload::user_at(payload, &["issue", "user"]);
    if let Some(author) = &author {
        upsert_user(tx, author, ctx.now_ms)?;
    }

    let patch = IssuePatch {
        github_id: payload::i64_at(payload, &["issue", "id"]),
        title: payload::str_at(payload, &["issue", "title"]).map(str::to_string),
        body: payload::str_at(payload, &["issue", "body"]).map(str::to_string),
        state: payload::str_at(payload, &["issue", "state"]).map(str::to_string),
        author_id: author.as_ref().map(|a| a.github_id),
        author_login: author.as_ref().map(|a| a.login.clone()),
        labels_json: payload::label_names_at(payload, &["issue", "labels"])
            .map(|l| payload::to_json_array(&l)),
        assignees_json: payload::logins_at(payload, &["issue", "assignees"])
            .map(|a| payload::to_json_array(&a)),
        comment_count: payload::i64_at(payload, &["issue", "comments"]),
    };
    let remote_ts = payload::timestamp_at(payload, &["issue", "updated_at"]).unwrap_or(0);
    upsert_issue(tx, repo, number, &patch, remote_ts, ctx.now_ms)?;

    Ok(match feed_for(action, number, payload) {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}

/// State changes are displayable; metadata edits are not.
fn feed_for(action: Option<&str>, number: IssueNumber, payload: &Value) -> Option<FeedEntry> {
    let kind = match action? {
        "opened" => "issue_opened",
        "closed" => "issue_closed",
        "reopened" => "issue_reopened",
        _ => return None,
    };
    let sender = payload::user_at(payload, &["sender"]);
    let title = payload::str_at(payload, &["issue", "title"]).unwrap_or("");
    Some(FeedEntry {
        kind: kind.to_string(),
        title: format!("{number} {title}").trim_end().to_string(),
        description: None,
        actor_login: sender.as_ref().map(|s| s.login.clone()),
        actor_avatar_url: sender.and_then(|s| s.avatar_url),
        entity_number: Some(number.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RecordingJobQueue;
    use crate::projection::list_feed;
    use crate::store::entities::get_issue;
    use crate::store::Store;
    use serde_json::json;

    const REPO: RepositoryId = RepositoryId(1);

    fn issue_payload(number: i64, title: &str, updated_at: &str) -> Value {
        json!({
            "repository": {"id": 1, "name": "r", "owner": {"login": "o"}},
            "sender": {"id": 2, "login": "sender"},
            "issue": {
                "id": 1000 + number,
                "number": number,
                "title": title,
                "body": "the body",
                "state": "open",
                "user": {"id": 5, "login": "author"},
                "labels": [{"name": "bug"}],
                "assignees": [{"login": "dev1"}, {"login": "dev2"}],
                "comments": 3,
                "updated_at": updated_at
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
                apply(tx, &ctx, Some(REPO), Some(action), payload)
            })
            .unwrap()
    }

    #[test]
    fn opened_issue_is_fully_extracted() {
        let store = Store::open_in_memory().unwrap();
        run(
            &store,
            "opened",
            &issue_payload(42, "Fix the flux capacitor", "2024-01-01T00:00:00Z"),
        );

        store
            .transact(|tx| {
                let row = get_issue(tx, REPO, IssueNumber(42))?.unwrap();
                assert_eq!(row.title, "Fix the flux capacitor");
                assert_eq!(row.body.as_deref(), Some("the body"));
                assert_eq!(row.state, "open");
                assert_eq!(row.author_login.as_deref(), Some("author"));
                assert_eq!(row.labels_json, r#"["bug"]"#);
                assert_eq!(row.assignees_json, r#"["dev1","dev2"]"#);
                assert_eq!(row.comment_count, 3);

                // The author's user row was mirrored too.
                let login: String = tx.query_row(
                    "SELECT login FROM users WHERE github_id = 5",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(login, "author");
                Ok(())
            })
            .unwrap();
    }

    /// Applying the same payload twice yields the same entity state.
    #[test]
    fn replay_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let payload = issue_payload(42, "Same", "2024-01-01T00:00:00Z");
        run(&store, "opened", &payload);
        let first = store
            .transact(|tx| get_issue(tx, REPO, IssueNumber(42)))
            .unwrap()
            .unwrap();

        run(&store, "opened", &payload);
        let second = store
            .transact(|tx| get_issue(tx, REPO, IssueNumber(42)))
            .unwrap()
            .unwrap();

        assert_eq!(first.title, second.title);
        assert_eq!(first.state, second.state);
        assert_eq!(first.labels_json, second.labels_json);
        assert_eq!(first.github_updated_at, second.github_updated_at);
    }

    /// Issue cached at T=100s; an edit from T=90s must change nothing, an
    /// edit from T=150s must land.
    #[test]
    fn out_of_order_edits_respect_remote_clock() {
        let store = Store::open_in_memory().unwrap();
        run(
            &store,
            "opened",
            &issue_payload(42, "current title", "1970-01-01T00:01:40Z"),
        );

        run(
            &store,
            "edited",
            &issue_payload(42, "stale title", "1970-01-01T00:01:30Z"),
        );
        let row = store
            .transact(|tx| get_issue(tx, REPO, IssueNumber(42)))
            .unwrap()
            .unwrap();
        assert_eq!(row.title, "current title");
        assert_eq!(row.github_updated_at, 100_000);

        run(
            &store,
            "edited",
            &issue_payload(42, "newer title", "1970-01-01T00:02:30Z"),
        );
        let row = store
            .transact(|tx| get_issue(tx, REPO, IssueNumber(42)))
            .unwrap()
            .unwrap();
        assert_eq!(row.title, "newer title");
        assert_eq!(row.github_updated_at, 150_000);
    }

    #[test]
    fn deleted_issue_removes_row_unconditionally() {
        let store = Store::open_in_memory().unwrap();
        run(
            &store,
            "opened",
            &issue_payload(42, "t", "2024-01-01T00:00:00Z"),
        );
        run(&store, "deleted", &json!({"issue": {"number": 42}}));

        let row = store
            .transact(|tx| get_issue(tx, REPO, IssueNumber(42)))
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn missing_number_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let outcome = run(&store, "opened", &json!({"issue": {"title": "no number"}}));
        assert!(outcome.repository_id.is_none());
    }

    #[test]
    fn state_changes_produce_feed_entries_but_edits_do_not() {
        let store = Store::open_in_memory().unwrap();
        let outcome = run(
            &store,
            "opened",
            &issue_payload(42, "t", "2024-01-01T00:00:00Z"),
        );
        assert!(outcome.feed.is_some());
        assert_eq!(outcome.feed.unwrap().kind, "issue_opened");

        let outcome = run(
            &store,
            "edited",
            &issue_payload(42, "t2", "2024-01-02T00:00:00Z"),
        );
        assert!(outcome.feed.is_none());

        let outcome = run(
            &store,
            "labeled",
            &issue_payload(42, "t2", "2024-01-03T00:00:00Z"),
        );
        assert!(outcome.feed.is_none());
    }

    #[test]
    fn feed_entries_land_in_the_activity_feed() {
        let store = Store::open_in_memory().unwrap();
        let jobs = RecordingJobQueue::new();
        store
            .transact(|tx| {
                let ctx = ApplyCtx {
                    jobs: &jobs,
                    now_ms: 1_000,
                };
                crate::events::apply_event(
                    tx,
                    &ctx,
                    "issues",
                    Some("closed"),
                    &issue_payload(42, "done", "2024-01-01T00:00:00Z").to_string(),
                    Some(1),
                    Some(10),
                )
            })
            .unwrap();

        let feed = store.transact(|tx| list_feed(tx, REPO, 10)).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, "issue_closed");
        assert_eq!(feed[0].actor_login.as_deref(), Some("sender"));
        assert_eq!(feed[0].entity_number, Some(42));
    }
}
