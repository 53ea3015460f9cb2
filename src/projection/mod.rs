//! Read-optimized projections derived from the entity store.
//!
//! Projections are never the source of truth. Counters are recomputed by full
//! re-aggregation and list views are deleted and reinserted wholesale on
//! every rebuild - O(n) per event, in exchange for the invariant that a
//! projection is always exactly reproducible from its source tables. The
//! activity feed is the one exception: append-only, one entry per applied
//! event that maps to something a person would want to see.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::store::Result;
use crate::types::RepositoryId;

/// Per-repository aggregate counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStats {
    pub repository_id: RepositoryId,
    pub open_issue_count: i64,
    pub open_pull_count: i64,
    pub failing_check_count: i64,
}

/// An activity feed entry to append for a user-visible action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub actor_login: Option<String>,
    pub actor_avatar_url: Option<String>,
    pub entity_number: Option<i64>,
}

/// Rebuilds every projection for one repository from the entity store.
pub fn rebuild(tx: &Transaction<'_>, repository_id: RepositoryId, now_ms: i64) -> Result<()> {
    rebuild_stats(tx, repository_id, now_ms)?;
    rebuild_issue_list(tx, repository_id)?;
    rebuild_pull_request_list(tx, repository_id)?;
    Ok(())
}

fn rebuild_stats(tx: &Transaction<'_>, repository_id: RepositoryId, now_ms: i64) -> Result<()> {
    let open_issues: i64 = tx.query_row(
        "SELECT COUNT(*) FROM issues WHERE repository_id = ?1 AND state = 'open'",
        params![repository_id.0],
        |row| row.get(0),
    )?;
    let open_pulls: i64 = tx.query_row(
        "SELECT COUNT(*) FROM pull_requests WHERE repository_id = ?1 AND state = 'open'",
        params![repository_id.0],
        |row| row.get(0),
    )?;
    let failing_checks: i64 = tx.query_row(
        "SELECT COUNT(*) FROM check_runs
         WHERE repository_id = ?1 AND conclusion IN ('failure', 'timed_out')",
        params![repository_id.0],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO repo_stats
             (repository_id, open_issue_count, open_pull_count,
              failing_check_count, rebuilt_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(repository_id) DO UPDATE SET
             open_issue_count = excluded.open_issue_count,
             open_pull_count = excluded.open_pull_count,
             failing_check_count = excluded.failing_check_count,
             rebuilt_at = excluded.rebuilt_at",
        params![repository_id.0, open_issues, open_pulls, failing_checks, now_ms],
    )?;
    Ok(())
}

fn rebuild_issue_list(tx: &Transaction<'_>, repository_id: RepositoryId) -> Result<()> {
    tx.execute(
        "DELETE FROM issue_list WHERE repository_id = ?1",
        params![repository_id.0],
    )?;
    tx.execute(
        "INSERT INTO issue_list
             (repository_id, number, title, state, author_login, label_count,
              comment_count, github_updated_at)
         SELECT repository_id, number, title, state, author_login,
                json_array_length(labels_json), comment_count, github_updated_at
         FROM issues WHERE repository_id = ?1",
        params![repository_id.0],
    )?;
    Ok(())
}

fn rebuild_pull_request_list(tx: &Transaction<'_>, repository_id: RepositoryId) -> Result<()> {
    tx.execute(
        "DELETE FROM pull_request_list WHERE repository_id = ?1",
        params![repository_id.0],
    )?;
    tx.execute(
        "INSERT INTO pull_request_list
             (repository_id, number, title, state, draft, merged, author_login,
              head_ref, base_ref, github_updated_at)
         SELECT repository_id, number, title, state, draft, merged, author_login,
                head_ref, base_ref, github_updated_at
         FROM pull_requests WHERE repository_id = ?1",
        params![repository_id.0],
    )?;
    Ok(())
}

/// Appends one activity feed entry. This is the sole write path into the
/// feed; entries are never rewritten.
pub fn append_activity_entry(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    installation_id: Option<i64>,
    entry: &FeedEntry,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO activity_feed
             (repository_id, installation_id, kind, title, description,
              actor_login, actor_avatar_url, entity_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            repository_id.0,
            installation_id,
            entry.kind,
            entry.title,
            entry.description,
            entry.actor_login,
            entry.actor_avatar_url,
            entry.entity_number,
            now_ms,
        ],
    )?;
    Ok(())
}

/// Reads the stats projection for one repository.
pub fn get_stats(tx: &Transaction<'_>, repository_id: RepositoryId) -> Result<Option<RepoStats>> {
    let stats = tx
        .query_row(
            "SELECT repository_id, open_issue_count, open_pull_count, failing_check_count
             FROM repo_stats WHERE repository_id = ?1",
            params![repository_id.0],
            |row| {
                Ok(RepoStats {
                    repository_id: RepositoryId(row.get(0)?),
                    open_issue_count: row.get(1)?,
                    open_pull_count: row.get(2)?,
                    failing_check_count: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(stats)
}

/// Reads feed entries for one repository, newest first.
pub fn list_feed(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    limit: usize,
) -> Result<Vec<FeedEntry>> {
    let mut stmt = tx.prepare(
        "SELECT kind, title, description, actor_login, actor_avatar_url, entity_number
         FROM activity_feed WHERE repository_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![repository_id.0, limit as i64], |row| {
        Ok(FeedEntry {
            kind: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            actor_login: row.get(3)?,
            actor_avatar_url: row.get(4)?,
            entity_number: row.get(5)?,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entities::{upsert_check_run, upsert_issue, upsert_pull_request};
    use crate::store::entities::{CheckRunPatch, IssuePatch, PullRequestPatch};
    use crate::store::Store;
    use crate::types::IssueNumber;

    const REPO: RepositoryId = RepositoryId(1);

    fn issue(tx: &rusqlite::Transaction<'_>, number: i64, state: &str) {
        upsert_issue(
            tx,
            REPO,
            IssueNumber(number),
            &IssuePatch {
                title: Some(format!("issue {number}")),
                state: Some(state.to_string()),
                ..IssuePatch::default()
            },
            100,
            0,
        )
        .unwrap();
    }

    #[test]
    fn stats_reflect_full_reaggregation() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                issue(tx, 1, "open");
                issue(tx, 2, "open");
                issue(tx, 3, "closed");
                upsert_pull_request(
                    tx,
                    REPO,
                    IssueNumber(10),
                    &PullRequestPatch {
                        state: Some("open".into()),
                        ..PullRequestPatch::default()
                    },
                    100,
                    0,
                )?;
                upsert_check_run(
                    tx,
                    REPO,
                    &CheckRunPatch {
                        github_id: 500,
                        conclusion: Some("failure".into()),
                        ..CheckRunPatch::default()
                    },
                    100,
                    0,
                )?;
                upsert_check_run(
                    tx,
                    REPO,
                    &CheckRunPatch {
                        github_id: 501,
                        conclusion: Some("success".into()),
                        ..CheckRunPatch::default()
                    },
                    100,
                    0,
                )?;

                rebuild(tx, REPO, 10)?;
                let stats = get_stats(tx, REPO)?.unwrap();
                assert_eq!(stats.open_issue_count, 2);
                assert_eq!(stats.open_pull_count, 1);
                assert_eq!(stats.failing_check_count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn rebuild_is_reproducible() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                issue(tx, 1, "open");
                rebuild(tx, REPO, 10)?;
                let first = get_stats(tx, REPO)?.unwrap();

                // A second rebuild from unchanged sources is identical.
                rebuild(tx, REPO, 20)?;
                let second = get_stats(tx, REPO)?.unwrap();
                assert_eq!(first, second);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn list_views_drop_stale_rows() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                issue(tx, 1, "open");
                rebuild(tx, REPO, 10)?;

                // Stale row planted directly in the view; rebuild must purge it.
                tx.execute(
                    "INSERT INTO issue_list
                         (repository_id, number, title, state, github_updated_at)
                     VALUES (1, 999, 'ghost', 'open', 0)",
                    [],
                )?;
                rebuild(tx, REPO, 20)?;

                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM issue_list WHERE repository_id = 1",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(count, 1);
                let number: i64 = tx.query_row(
                    "SELECT number FROM issue_list WHERE repository_id = 1",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(number, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn rebuild_scopes_to_one_repository() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                issue(tx, 1, "open");
                upsert_issue(
                    tx,
                    RepositoryId(2),
                    IssueNumber(5),
                    &IssuePatch {
                        state: Some("open".into()),
                        ..IssuePatch::default()
                    },
                    100,
                    0,
                )?;
                rebuild(tx, REPO, 10)?;
                rebuild(tx, RepositoryId(2), 10)?;

                let other = get_stats(tx, RepositoryId(2))?.unwrap();
                assert_eq!(other.open_issue_count, 1);

                // Rebuilding repo 1 again leaves repo 2's projection alone.
                rebuild(tx, REPO, 20)?;
                assert_eq!(get_stats(tx, RepositoryId(2))?.unwrap(), other);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn feed_is_append_only() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                let entry = FeedEntry {
                    kind: "issue_opened".into(),
                    title: "Opened #1".into(),
                    description: None,
                    actor_login: Some("octocat".into()),
                    actor_avatar_url: None,
                    entity_number: Some(1),
                };
                append_activity_entry(tx, REPO, Some(10), &entry, 100)?;
                append_activity_entry(tx, REPO, Some(10), &entry, 200)?;

                let feed = list_feed(tx, REPO, 10)?;
                assert_eq!(feed.len(), 2);
                Ok(())
            })
            .unwrap();
    }
}
