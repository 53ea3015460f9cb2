//! Database schema and migrations.
//!
//! The whole normalized model lives here: the raw webhook queue, dead
//! letters, one table per mirrored GitHub entity type, and the derived
//! projection tables. Uniqueness invariants are enforced by UNIQUE indexes,
//! not application logic, so a racing double-apply degrades to a keyed upsert
//! instead of a duplicate row.

use rusqlite::{params, Connection};

use super::{Result, StoreError};

/// Current schema version. Increment when making schema changes and add
/// corresponding migration logic in [`run_migrations`].
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Run migrations from `from_version` up to [`CURRENT_SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection, from_version: i64) -> Result<()> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Config(format!(
            "database schema version {from_version} is newer than supported \
             version {CURRENT_SCHEMA_VERSION}; upgrade the application"
        )));
    }

    if from_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if from_version < 1 {
        conn.execute_batch(
            r#"
            -- ─── Raw webhook event queue ───

            CREATE TABLE raw_events (
                id INTEGER PRIMARY KEY,
                delivery_id TEXT NOT NULL UNIQUE,
                event_name TEXT NOT NULL,
                action TEXT,
                payload_json TEXT NOT NULL,
                repository_id INTEGER,
                installation_id INTEGER,
                process_state TEXT NOT NULL DEFAULT 'pending',
                process_attempts INTEGER NOT NULL DEFAULT 0,
                process_error TEXT,
                next_retry_at INTEGER,
                received_at INTEGER NOT NULL,
                processed_at INTEGER
            );
            CREATE INDEX idx_raw_events_state
                ON raw_events(process_state, received_at);
            CREATE INDEX idx_raw_events_retry_due
                ON raw_events(next_retry_at) WHERE process_state = 'retry';
            CREATE INDEX idx_raw_events_processed_at
                ON raw_events(processed_at) WHERE processed_at IS NOT NULL;

            CREATE TABLE dead_letters (
                id INTEGER PRIMARY KEY,
                delivery_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_dead_letters_delivery ON dead_letters(delivery_id);

            -- ─── Mirrored entities ───

            CREATE TABLE installations (
                github_id INTEGER PRIMARY KEY,
                account_login TEXT NOT NULL,
                account_id INTEGER,
                suspended INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_installations_login ON installations(account_login);

            CREATE TABLE repositories (
                github_id INTEGER PRIMARY KEY,
                installation_id INTEGER NOT NULL DEFAULT 0,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                default_branch TEXT,
                private INTEGER NOT NULL DEFAULT 0,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX idx_repositories_full_name
                ON repositories(owner, name);
            CREATE INDEX idx_repositories_installation
                ON repositories(installation_id);

            CREATE TABLE users (
                github_id INTEGER PRIMARY KEY,
                login TEXT NOT NULL,
                avatar_url TEXT,
                kind TEXT,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_users_login ON users(login);

            CREATE TABLE issues (
                id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                number INTEGER NOT NULL,
                github_id INTEGER,
                title TEXT NOT NULL DEFAULT '',
                body TEXT,
                state TEXT NOT NULL DEFAULT 'open',
                author_id INTEGER,
                author_login TEXT,
                labels_json TEXT NOT NULL DEFAULT '[]',
                assignees_json TEXT NOT NULL DEFAULT '[]',
                comment_count INTEGER NOT NULL DEFAULT 0,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                optimistic_correlation_id TEXT,
                optimistic_operation TEXT,
                optimistic_state TEXT,
                optimistic_payload_json TEXT,
                optimistic_error_message TEXT,
                optimistic_error_status INTEGER,
                optimistic_updated_at INTEGER,
                UNIQUE(repository_id, number)
            );
            CREATE INDEX idx_issues_repo_state ON issues(repository_id, state);
            CREATE INDEX idx_issues_correlation
                ON issues(optimistic_correlation_id)
                WHERE optimistic_correlation_id IS NOT NULL;

            CREATE TABLE pull_requests (
                id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                number INTEGER NOT NULL,
                github_id INTEGER,
                title TEXT NOT NULL DEFAULT '',
                body TEXT,
                state TEXT NOT NULL DEFAULT 'open',
                draft INTEGER NOT NULL DEFAULT 0,
                merged INTEGER NOT NULL DEFAULT 0,
                merge_commit_sha TEXT,
                head_ref TEXT,
                head_sha TEXT,
                base_ref TEXT,
                author_id INTEGER,
                author_login TEXT,
                labels_json TEXT NOT NULL DEFAULT '[]',
                assignees_json TEXT NOT NULL DEFAULT '[]',
                requested_reviewers_json TEXT NOT NULL DEFAULT '[]',
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                optimistic_correlation_id TEXT,
                optimistic_operation TEXT,
                optimistic_state TEXT,
                optimistic_payload_json TEXT,
                optimistic_error_message TEXT,
                optimistic_error_status INTEGER,
                optimistic_updated_at INTEGER,
                UNIQUE(repository_id, number)
            );
            CREATE INDEX idx_pull_requests_repo_state
                ON pull_requests(repository_id, state);
            CREATE INDEX idx_pull_requests_correlation
                ON pull_requests(optimistic_correlation_id)
                WHERE optimistic_correlation_id IS NOT NULL;

            CREATE TABLE comments (
                github_id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                issue_number INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT 'issue',
                body TEXT,
                author_id INTEGER,
                author_login TEXT,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_comments_issue
                ON comments(repository_id, issue_number);

            CREATE TABLE reviews (
                github_id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                pull_number INTEGER NOT NULL,
                state TEXT,
                body TEXT,
                author_id INTEGER,
                author_login TEXT,
                submitted_at INTEGER,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_reviews_pull ON reviews(repository_id, pull_number);

            CREATE TABLE check_runs (
                github_id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                name TEXT,
                head_sha TEXT,
                status TEXT,
                conclusion TEXT,
                details_url TEXT,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_check_runs_repo ON check_runs(repository_id);
            CREATE INDEX idx_check_runs_sha ON check_runs(repository_id, head_sha);

            CREATE TABLE workflow_runs (
                github_id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                name TEXT,
                head_branch TEXT,
                head_sha TEXT,
                status TEXT,
                conclusion TEXT,
                run_number INTEGER,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_workflow_runs_repo ON workflow_runs(repository_id);

            CREATE TABLE workflow_jobs (
                github_id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                run_id INTEGER,
                name TEXT,
                status TEXT,
                conclusion TEXT,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_workflow_jobs_run ON workflow_jobs(run_id);

            CREATE TABLE branches (
                repository_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                head_sha TEXT,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (repository_id, name)
            );

            CREATE TABLE commits (
                repository_id INTEGER NOT NULL,
                sha TEXT NOT NULL,
                message TEXT,
                author_login TEXT,
                authored_at INTEGER,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (repository_id, sha)
            );

            CREATE TABLE members (
                repository_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                login TEXT NOT NULL,
                role TEXT,
                cached_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (repository_id, user_id)
            );

            -- ─── Projections (derived, rebuildable) ───

            CREATE TABLE repo_stats (
                repository_id INTEGER PRIMARY KEY,
                open_issue_count INTEGER NOT NULL DEFAULT 0,
                open_pull_count INTEGER NOT NULL DEFAULT 0,
                failing_check_count INTEGER NOT NULL DEFAULT 0,
                rebuilt_at INTEGER NOT NULL
            );

            CREATE TABLE issue_list (
                repository_id INTEGER NOT NULL,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                author_login TEXT,
                label_count INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (repository_id, number)
            );

            CREATE TABLE pull_request_list (
                repository_id INTEGER NOT NULL,
                number INTEGER NOT NULL,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                draft INTEGER NOT NULL DEFAULT 0,
                merged INTEGER NOT NULL DEFAULT 0,
                author_login TEXT,
                head_ref TEXT,
                base_ref TEXT,
                github_updated_at INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (repository_id, number)
            );

            CREATE TABLE activity_feed (
                id INTEGER PRIMARY KEY,
                repository_id INTEGER NOT NULL,
                installation_id INTEGER,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                actor_login TEXT,
                actor_avatar_url TEXT,
                entity_number INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_activity_feed_repo
                ON activity_feed(repository_id, created_at);

            -- ─── Outbound job queue (dependent workflows) ───

            CREATE TABLE outbound_jobs (
                id INTEGER PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                run_after INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_outbound_jobs_due ON outbound_jobs(run_after);
            "#,
        )?;
    }

    // Future migrations go here:
    // if from_version < 2 { ... }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::store::Store;

    #[test]
    fn issue_uniqueness_is_enforced_by_index() {
        let store = Store::open_in_memory().unwrap();
        let result = store.transact(|tx| {
            tx.execute(
                "INSERT INTO issues (repository_id, number, cached_at, updated_at)
                 VALUES (1, 42, 0, 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO issues (repository_id, number, cached_at, updated_at)
                 VALUES (1, 42, 0, 0)",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn same_number_in_different_repos_is_fine() {
        let store = Store::open_in_memory().unwrap();
        store
            .transact(|tx| {
                tx.execute(
                    "INSERT INTO issues (repository_id, number, cached_at, updated_at)
                     VALUES (1, 42, 0, 0)",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO issues (repository_id, number, cached_at, updated_at)
                     VALUES (2, 42, 0, 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delivery_id_is_unique() {
        let store = Store::open_in_memory().unwrap();
        let result = store.transact(|tx| {
            tx.execute(
                "INSERT INTO raw_events (delivery_id, event_name, payload_json, received_at)
                 VALUES ('d1', 'issues', '{}', 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO raw_events (delivery_id, event_name, payload_json, received_at)
                 VALUES ('d1', 'issues', '{}', 0)",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());
    }
}
