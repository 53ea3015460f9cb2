//! Handler for `pull_request` events.

use rusqlite::Transaction;
use serde_json::{json, Value};
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::jobs::job_type;
use crate::projection::FeedEntry;
use crate::store::entities::{upsert_pull_request, upsert_user, PullRequestPatch};
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
    let Some(number) = payload::i64_at(payload, &["pull_request", "number"]) else {
        debug!("pull_request event without pull_request.number");
        return Ok(Outcome::noop());
    };
    let number = IssueNumber(number);

    let author = payload::user_at(payload, &["pull_request", "user"]);
    if let Some(author) = &author {
        upsert_user(tx, author, ctx.now_ms)?;
    }

    let patch = PullRequestPatch {
        github_id: payload::i64_at(payload, &["pull_request", "id"]),
        title: payload::str_at(payload, &["pull_request", "title"]).map(str::to_string),
        body: payload::str_at(payload, &["pull_request", "body"]).map(str::to_string),
        state: payload::str_at(payload, &["pull_request", "state"]).map(str::to_string),
        draft: payload::bool_at(payload, &["pull_request", "draft"]),
        merged: payload::bool_at(payload, &["pull_request", "merged"]),
        merge_commit_sha: payload::str_at(payload, &["pull_request", "merge_commit_sha"])
            .map(str::to_string),
        head_ref: payload::str_at(payload, &["pull_request", "head", "ref"]).map(str::to_string),
        head_sha: payload::str_at(payload, &["pull_request", "head", "sha"]).map(str::to_string),
        base_ref: payload::str_at(payload, &["pull_request", "base", "ref"]).map(str::to_string),
        author_id: author.as_ref().map(|a| a.github_id),
        author_login: author.as_ref().map(|a| a.login.clone()),
        labels_json: payload::label_names_at(payload, &["pull_request", "labels"])
            .map(|l| payload::to_json_array(&l)),
        assignees_json: payload::logins_at(payload, &["pull_request", "assignees"])
            .map(|a| payload::to_json_array(&a)),
        requested_reviewers_json: payload::logins_at(
            payload,
            &["pull_request", "requested_reviewers"],
        )
        .map(|r| payload::to_json_array(&r)),
    };
    let remote_ts = payload::timestamp_at(payload, &["pull_request", "updated_at"]).unwrap_or(0);
    upsert_pull_request(tx, repo, number, &patch, remote_ts, ctx.now_ms)?;

    // The head moved (or just appeared): schedule a diff fetch for the read
    // layer. Runs outside this engine.
    if matches!(action, Some("opened") | Some("synchronize") | Some("reopened")) {
        ctx.jobs.enqueue(
            tx,
            job_type::FILE_DIFF_SYNC,
            &json!({"repository_id": repo.0, "number": number.0}),
            0,
            ctx.now_ms,
        )?;
    }

    Ok(match feed_for(action, number, payload) {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}

fn feed_for(action: Option<&str>, number: IssueNumber, payload: &Value) -> Option<FeedEntry> {
    let merged = payload::bool_at(payload, &["pull_request", "merged"]).unwrap_or(false);
    let kind = match action? {
        "opened" => "pull_request_opened",
        "closed" if merged => "pull_request_merged",
        "closed" => "pull_request_closed",
        "reopened" => "pull_request_reopened",
        "ready_for_review" => "pull_request_ready",
        _ => return None,
    };
    let sender = payload::user_at(payload, &["sender"]);
    let title = payload::str_at(payload, &["pull_request", "title"]).unwrap_or("");
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
    use crate::store::entities::get_pull_request;
    use crate::store::Store;

    const REPO: RepositoryId = RepositoryId(1);

    fn pr_payload(number: i64, updated_at: &str, merged: bool) -> Value {
        json!({
            "repository": {"id": 1, "name": "r", "owner": {"login": "o"}},
            "sender": {"id": 2, "login": "sender"},
            "pull_request": {
                "id": 2000 + number,
                "number": number,
                "title": "Add feature",
                "state": if merged { "closed" } else { "open" },
                "draft": false,
                "merged": merged,
                "merge_commit_sha": if merged { Value::from("c".repeat(40)) } else { Value::Null },
                "head": {"ref": "feature", "sha": "a".repeat(40)},
                "base": {"ref": "main"},
                "user": {"id": 5, "login": "author"},
                "labels": [],
                "assignees": [],
                "requested_reviewers": [{"login": "reviewer1"}],
                "updated_at": updated_at
            }
        })
    }

    fn run(store: &Store, action: &str, payload: &Value) -> (Outcome, RecordingJobQueue) {
        let jobs = RecordingJobQueue::new();
        let outcome = store
            .transact(|tx| {
                let ctx = ApplyCtx {
                    jobs: &jobs,
                    now_ms: 1_000,
                };
                apply(tx, &ctx, Some(REPO), Some(action), payload)
            })
            .unwrap();
        (outcome, jobs)
    }

    #[test]
    fn opened_pr_extracts_refs_and_reviewers() {
        let store = Store::open_in_memory().unwrap();
        run(&store, "opened", &pr_payload(7, "2024-01-01T00:00:00Z", false));

        let row = store
            .transact(|tx| get_pull_request(tx, REPO, IssueNumber(7)))
            .unwrap()
            .unwrap();
        assert_eq!(row.head_ref.as_deref(), Some("feature"));
        assert_eq!(row.base_ref.as_deref(), Some("main"));
        assert_eq!(row.requested_reviewers_json, r#"["reviewer1"]"#);
        assert!(!row.merged);
    }

    #[test]
    fn merged_close_records_merge_sha_and_feed() {
        let store = Store::open_in_memory().unwrap();
        let (outcome, _) = run(&store, "closed", &pr_payload(7, "2024-01-01T00:00:00Z", true));

        let row = store
            .transact(|tx| get_pull_request(tx, REPO, IssueNumber(7)))
            .unwrap()
            .unwrap();
        assert!(row.merged);
        assert_eq!(row.state, "closed");
        assert!(row.merge_commit_sha.is_some());
        assert_eq!(outcome.feed.unwrap().kind, "pull_request_merged");
    }

    #[test]
    fn stale_update_is_gated_out() {
        let store = Store::open_in_memory().unwrap();
        run(&store, "opened", &pr_payload(7, "2024-06-01T00:00:00Z", false));
        run(&store, "closed", &pr_payload(7, "2024-01-01T00:00:00Z", true));

        let row = store
            .transact(|tx| get_pull_request(tx, REPO, IssueNumber(7)))
            .unwrap()
            .unwrap();
        // The delayed close from January lost to the June state.
        assert_eq!(row.state, "open");
        assert!(!row.merged);
    }

    #[test]
    fn head_movement_schedules_diff_sync() {
        let store = Store::open_in_memory().unwrap();
        let (_, jobs) = run(&store, "synchronize", &pr_payload(7, "2024-01-01T00:00:00Z", false));
        let recorded = jobs.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, job_type::FILE_DIFF_SYNC);
        assert_eq!(recorded[0].1["number"], 7);

        let (_, jobs) = run(&store, "edited", &pr_payload(7, "2024-02-01T00:00:00Z", false));
        assert!(jobs.recorded().is_empty());
    }
}
