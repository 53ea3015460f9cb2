//! Normalized entity rows and their keyed upserts.
//!
//! Every upsert here is idempotent and, where the entity carries a remote
//! timestamp, gated on it: an incoming patch replaces normalized fields only
//! if its `github_updated_at` is at least the stored value. Last writer wins
//! by the *remote* clock, not by arrival order, so duplicate or delayed
//! redelivery never regresses state.
//!
//! Patch fields are `Option`: `None` means "absent from the payload, leave
//! the stored value alone". The optimistic-ledger columns are never touched
//! by these upserts; they belong to [`super::ledger`].

use rusqlite::{params, OptionalExtension, Transaction};

use crate::types::{IssueNumber, RepositoryId};

use super::Result;

// ─── Users ───────────────────────────────────────────────────────────────

/// Actor/user patch extracted from an event payload.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub github_id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
    pub kind: Option<String>,
}

/// Upserts a user row. User objects embedded in webhook payloads carry no
/// remote timestamp, so the freshest arrival wins.
pub fn upsert_user(tx: &Transaction<'_>, user: &UserPatch, now_ms: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO users (github_id, login, avatar_url, kind, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(github_id) DO UPDATE SET
             login = excluded.login,
             avatar_url = COALESCE(excluded.avatar_url, users.avatar_url),
             kind = COALESCE(excluded.kind, users.kind),
             updated_at = excluded.updated_at",
        params![user.github_id, user.login, user.avatar_url, user.kind, now_ms],
    )?;
    Ok(())
}

// ─── Repositories ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RepositoryPatch {
    pub github_id: i64,
    pub owner: String,
    pub name: String,
    pub installation_id: Option<i64>,
    pub default_branch: Option<String>,
    pub private: Option<bool>,
}

pub fn upsert_repository(tx: &Transaction<'_>, repo: &RepositoryPatch, now_ms: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO repositories
             (github_id, installation_id, owner, name, default_branch, private,
              cached_at, updated_at)
         VALUES (?1, COALESCE(?2, 0), ?3, ?4, ?5, COALESCE(?6, 0), ?7, ?7)
         ON CONFLICT(github_id) DO UPDATE SET
             installation_id = COALESCE(?2, repositories.installation_id),
             owner = excluded.owner,
             name = excluded.name,
             default_branch = COALESCE(excluded.default_branch, repositories.default_branch),
             private = COALESCE(?6, repositories.private),
             updated_at = excluded.updated_at",
        params![
            repo.github_id,
            repo.installation_id,
            repo.owner,
            repo.name,
            repo.default_branch,
            repo.private.map(i64::from),
            now_ms,
        ],
    )?;
    Ok(())
}

pub fn delete_repository(tx: &Transaction<'_>, repository_id: RepositoryId) -> Result<()> {
    tx.execute(
        "DELETE FROM repositories WHERE github_id = ?1",
        params![repository_id.0],
    )?;
    Ok(())
}

// ─── Installations ───────────────────────────────────────────────────────

pub fn upsert_installation(
    tx: &Transaction<'_>,
    github_id: i64,
    account_login: &str,
    account_id: Option<i64>,
    suspended: bool,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO installations
             (github_id, account_login, account_id, suspended, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(github_id) DO UPDATE SET
             account_login = excluded.account_login,
             account_id = COALESCE(excluded.account_id, installations.account_id),
             suspended = excluded.suspended,
             updated_at = excluded.updated_at",
        params![github_id, account_login, account_id, suspended as i64, now_ms],
    )?;
    Ok(())
}

pub fn delete_installation(tx: &Transaction<'_>, github_id: i64) -> Result<()> {
    tx.execute(
        "DELETE FROM installations WHERE github_id = ?1",
        params![github_id],
    )?;
    Ok(())
}

/// Upgrades placeholder repositories to a real installation.
///
/// A repository connected manually before the app was installed is recorded
/// with installation id 0. When the installation event finally arrives, every
/// placeholder owned by the installation's account is claimed in place.
/// Returns the number of repositories upgraded.
pub fn upgrade_placeholder_installation(
    tx: &Transaction<'_>,
    account_login: &str,
    installation_id: i64,
    now_ms: i64,
) -> Result<usize> {
    let upgraded = tx.execute(
        "UPDATE repositories
         SET installation_id = ?2, updated_at = ?3
         WHERE installation_id = 0 AND owner = ?1",
        params![account_login, installation_id, now_ms],
    )?;
    Ok(upgraded)
}

// ─── Issues ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub github_id: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    /// JSON array of label names.
    pub labels_json: Option<String>,
    /// JSON array of assignee logins.
    pub assignees_json: Option<String>,
    pub comment_count: Option<i64>,
}

/// Full issue row, including the embedded optimistic ledger.
#[derive(Debug, Clone)]
pub struct IssueRow {
    pub repository_id: RepositoryId,
    pub number: IssueNumber,
    pub github_id: Option<i64>,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    pub labels_json: String,
    pub assignees_json: String,
    pub comment_count: i64,
    pub github_updated_at: i64,
    pub optimistic_correlation_id: Option<String>,
    pub optimistic_operation: Option<String>,
    pub optimistic_state: Option<String>,
    pub optimistic_error_message: Option<String>,
    pub optimistic_error_status: Option<i64>,
    pub optimistic_updated_at: Option<i64>,
}

/// Upserts an issue, gated on `github_updated_at`.
///
/// Returns `true` if the row was inserted or the patch was applied, `false`
/// if the gate rejected a stale patch.
pub fn upsert_issue(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    number: IssueNumber,
    patch: &IssuePatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO issues
             (repository_id, number, github_id, title, body, state,
              author_id, author_login, labels_json, assignees_json,
              comment_count, github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, COALESCE(?4, ''), ?5, COALESCE(?6, 'open'),
                 ?7, ?8, COALESCE(?9, '[]'), COALESCE(?10, '[]'),
                 COALESCE(?11, 0), ?12, ?13, ?13)
         ON CONFLICT(repository_id, number) DO UPDATE SET
             github_id = COALESCE(?3, issues.github_id),
             title = COALESCE(?4, issues.title),
             body = COALESCE(?5, issues.body),
             state = COALESCE(?6, issues.state),
             author_id = COALESCE(?7, issues.author_id),
             author_login = COALESCE(?8, issues.author_login),
             labels_json = COALESCE(?9, issues.labels_json),
             assignees_json = COALESCE(?10, issues.assignees_json),
             comment_count = COALESCE(?11, issues.comment_count),
             github_updated_at = ?12,
             updated_at = ?13
         WHERE ?12 >= issues.github_updated_at",
        params![
            repository_id.0,
            number.0,
            patch.github_id,
            patch.title,
            patch.body,
            patch.state,
            patch.author_id,
            patch.author_login,
            patch.labels_json,
            patch.assignees_json,
            patch.comment_count,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

pub fn get_issue(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    number: IssueNumber,
) -> Result<Option<IssueRow>> {
    let row = tx
        .query_row(
            "SELECT repository_id, number, github_id, title, body, state,
                    author_id, author_login, labels_json, assignees_json,
                    comment_count, github_updated_at,
                    optimistic_correlation_id, optimistic_operation,
                    optimistic_state, optimistic_error_message,
                    optimistic_error_status, optimistic_updated_at
             FROM issues WHERE repository_id = ?1 AND number = ?2",
            params![repository_id.0, number.0],
            |row| {
                Ok(IssueRow {
                    repository_id: RepositoryId(row.get(0)?),
                    number: IssueNumber(row.get(1)?),
                    github_id: row.get(2)?,
                    title: row.get(3)?,
                    body: row.get(4)?,
                    state: row.get(5)?,
                    author_id: row.get(6)?,
                    author_login: row.get(7)?,
                    labels_json: row.get(8)?,
                    assignees_json: row.get(9)?,
                    comment_count: row.get(10)?,
                    github_updated_at: row.get(11)?,
                    optimistic_correlation_id: row.get(12)?,
                    optimistic_operation: row.get(13)?,
                    optimistic_state: row.get(14)?,
                    optimistic_error_message: row.get(15)?,
                    optimistic_error_status: row.get(16)?,
                    optimistic_updated_at: row.get(17)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ─── Pull requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PullRequestPatch {
    pub github_id: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub draft: Option<bool>,
    pub merged: Option<bool>,
    pub merge_commit_sha: Option<String>,
    pub head_ref: Option<String>,
    pub head_sha: Option<String>,
    pub base_ref: Option<String>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    pub labels_json: Option<String>,
    pub assignees_json: Option<String>,
    pub requested_reviewers_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PullRequestRow {
    pub repository_id: RepositoryId,
    pub number: IssueNumber,
    pub github_id: Option<i64>,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub draft: bool,
    pub merged: bool,
    pub merge_commit_sha: Option<String>,
    pub head_ref: Option<String>,
    pub head_sha: Option<String>,
    pub base_ref: Option<String>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    pub labels_json: String,
    pub assignees_json: String,
    pub requested_reviewers_json: String,
    pub github_updated_at: i64,
    pub optimistic_correlation_id: Option<String>,
    pub optimistic_operation: Option<String>,
    pub optimistic_state: Option<String>,
    pub optimistic_error_message: Option<String>,
    pub optimistic_error_status: Option<i64>,
    pub optimistic_updated_at: Option<i64>,
}

/// Upserts a pull request, gated on `github_updated_at`. Same contract as
/// [`upsert_issue`].
pub fn upsert_pull_request(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    number: IssueNumber,
    patch: &PullRequestPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO pull_requests
             (repository_id, number, github_id, title, body, state, draft,
              merged, merge_commit_sha, head_ref, head_sha, base_ref,
              author_id, author_login, labels_json, assignees_json,
              requested_reviewers_json, github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, COALESCE(?4, ''), ?5, COALESCE(?6, 'open'),
                 COALESCE(?7, 0), COALESCE(?8, 0), ?9, ?10, ?11, ?12,
                 ?13, ?14, COALESCE(?15, '[]'), COALESCE(?16, '[]'),
                 COALESCE(?17, '[]'), ?18, ?19, ?19)
         ON CONFLICT(repository_id, number) DO UPDATE SET
             github_id = COALESCE(?3, pull_requests.github_id),
             title = COALESCE(?4, pull_requests.title),
             body = COALESCE(?5, pull_requests.body),
             state = COALESCE(?6, pull_requests.state),
             draft = COALESCE(?7, pull_requests.draft),
             merged = COALESCE(?8, pull_requests.merged),
             merge_commit_sha = COALESCE(?9, pull_requests.merge_commit_sha),
             head_ref = COALESCE(?10, pull_requests.head_ref),
             head_sha = COALESCE(?11, pull_requests.head_sha),
             base_ref = COALESCE(?12, pull_requests.base_ref),
             author_id = COALESCE(?13, pull_requests.author_id),
             author_login = COALESCE(?14, pull_requests.author_login),
             labels_json = COALESCE(?15, pull_requests.labels_json),
             assignees_json = COALESCE(?16, pull_requests.assignees_json),
             requested_reviewers_json = COALESCE(?17, pull_requests.requested_reviewers_json),
             github_updated_at = ?18,
             updated_at = ?19
         WHERE ?18 >= pull_requests.github_updated_at",
        params![
            repository_id.0,
            number.0,
            patch.github_id,
            patch.title,
            patch.body,
            patch.state,
            patch.draft.map(i64::from),
            patch.merged.map(i64::from),
            patch.merge_commit_sha,
            patch.head_ref,
            patch.head_sha,
            patch.base_ref,
            patch.author_id,
            patch.author_login,
            patch.labels_json,
            patch.assignees_json,
            patch.requested_reviewers_json,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

pub fn get_pull_request(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    number: IssueNumber,
) -> Result<Option<PullRequestRow>> {
    let row = tx
        .query_row(
            "SELECT repository_id, number, github_id, title, body, state, draft,
                    merged, merge_commit_sha, head_ref, head_sha, base_ref,
                    author_id, author_login, labels_json, assignees_json,
                    requested_reviewers_json, github_updated_at,
                    optimistic_correlation_id, optimistic_operation,
                    optimistic_state, optimistic_error_message,
                    optimistic_error_status, optimistic_updated_at
             FROM pull_requests WHERE repository_id = ?1 AND number = ?2",
            params![repository_id.0, number.0],
            |row| {
                Ok(PullRequestRow {
                    repository_id: RepositoryId(row.get(0)?),
                    number: IssueNumber(row.get(1)?),
                    github_id: row.get(2)?,
                    title: row.get(3)?,
                    body: row.get(4)?,
                    state: row.get(5)?,
                    draft: row.get::<_, i64>(6)? != 0,
                    merged: row.get::<_, i64>(7)? != 0,
                    merge_commit_sha: row.get(8)?,
                    head_ref: row.get(9)?,
                    head_sha: row.get(10)?,
                    base_ref: row.get(11)?,
                    author_id: row.get(12)?,
                    author_login: row.get(13)?,
                    labels_json: row.get(14)?,
                    assignees_json: row.get(15)?,
                    requested_reviewers_json: row.get(16)?,
                    github_updated_at: row.get(17)?,
                    optimistic_correlation_id: row.get(18)?,
                    optimistic_operation: row.get(19)?,
                    optimistic_state: row.get(20)?,
                    optimistic_error_message: row.get(21)?,
                    optimistic_error_status: row.get(22)?,
                    optimistic_updated_at: row.get(23)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

// ─── Comments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CommentPatch {
    pub github_id: i64,
    pub issue_number: i64,
    /// "issue" or "review" (inline review comments).
    pub kind: String,
    pub body: Option<String>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
}

pub fn upsert_comment(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    patch: &CommentPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO comments
             (github_id, repository_id, issue_number, kind, body,
              author_id, author_login, github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(github_id) DO UPDATE SET
             issue_number = excluded.issue_number,
             kind = excluded.kind,
             body = COALESCE(?5, comments.body),
             author_id = COALESCE(?6, comments.author_id),
             author_login = COALESCE(?7, comments.author_login),
             github_updated_at = ?8,
             updated_at = ?9
         WHERE ?8 >= comments.github_updated_at",
        params![
            patch.github_id,
            repository_id.0,
            patch.issue_number,
            patch.kind,
            patch.body,
            patch.author_id,
            patch.author_login,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

/// Deletes a comment unconditionally. GitHub does not redeliver deleted
/// comments, so there is no timestamp to gate on.
pub fn delete_comment(tx: &Transaction<'_>, comment_github_id: i64) -> Result<bool> {
    let deleted = tx.execute(
        "DELETE FROM comments WHERE github_id = ?1",
        params![comment_github_id],
    )?;
    Ok(deleted > 0)
}

pub fn count_comments(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    issue_number: i64,
) -> Result<i64> {
    let count = tx.query_row(
        "SELECT COUNT(*) FROM comments WHERE repository_id = ?1 AND issue_number = ?2",
        params![repository_id.0, issue_number],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ─── Reviews ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ReviewPatch {
    pub github_id: i64,
    pub pull_number: i64,
    pub state: Option<String>,
    pub body: Option<String>,
    pub author_id: Option<i64>,
    pub author_login: Option<String>,
    pub submitted_at: Option<i64>,
}

pub fn upsert_review(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    patch: &ReviewPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO reviews
             (github_id, repository_id, pull_number, state, body,
              author_id, author_login, submitted_at, github_updated_at,
              cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(github_id) DO UPDATE SET
             pull_number = excluded.pull_number,
             state = COALESCE(?4, reviews.state),
             body = COALESCE(?5, reviews.body),
             author_id = COALESCE(?6, reviews.author_id),
             author_login = COALESCE(?7, reviews.author_login),
             submitted_at = COALESCE(?8, reviews.submitted_at),
             github_updated_at = ?9,
             updated_at = ?10
         WHERE ?9 >= reviews.github_updated_at",
        params![
            patch.github_id,
            repository_id.0,
            patch.pull_number,
            patch.state,
            patch.body,
            patch.author_id,
            patch.author_login,
            patch.submitted_at,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

// ─── Check runs / workflow runs / workflow jobs ──────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CheckRunPatch {
    pub github_id: i64,
    pub name: Option<String>,
    pub head_sha: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub details_url: Option<String>,
}

pub fn upsert_check_run(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    patch: &CheckRunPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO check_runs
             (github_id, repository_id, name, head_sha, status, conclusion,
              details_url, github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(github_id) DO UPDATE SET
             name = COALESCE(?3, check_runs.name),
             head_sha = COALESCE(?4, check_runs.head_sha),
             status = COALESCE(?5, check_runs.status),
             conclusion = COALESCE(?6, check_runs.conclusion),
             details_url = COALESCE(?7, check_runs.details_url),
             github_updated_at = ?8,
             updated_at = ?9
         WHERE ?8 >= check_runs.github_updated_at",
        params![
            patch.github_id,
            repository_id.0,
            patch.name,
            patch.head_sha,
            patch.status,
            patch.conclusion,
            patch.details_url,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowRunPatch {
    pub github_id: i64,
    pub name: Option<String>,
    pub head_branch: Option<String>,
    pub head_sha: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub run_number: Option<i64>,
}

pub fn upsert_workflow_run(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    patch: &WorkflowRunPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO workflow_runs
             (github_id, repository_id, name, head_branch, head_sha, status,
              conclusion, run_number, github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
         ON CONFLICT(github_id) DO UPDATE SET
             name = COALESCE(?3, workflow_runs.name),
             head_branch = COALESCE(?4, workflow_runs.head_branch),
             head_sha = COALESCE(?5, workflow_runs.head_sha),
             status = COALESCE(?6, workflow_runs.status),
             conclusion = COALESCE(?7, workflow_runs.conclusion),
             run_number = COALESCE(?8, workflow_runs.run_number),
             github_updated_at = ?9,
             updated_at = ?10
         WHERE ?9 >= workflow_runs.github_updated_at",
        params![
            patch.github_id,
            repository_id.0,
            patch.name,
            patch.head_branch,
            patch.head_sha,
            patch.status,
            patch.conclusion,
            patch.run_number,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowJobPatch {
    pub github_id: i64,
    pub run_id: Option<i64>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
}

pub fn upsert_workflow_job(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    patch: &WorkflowJobPatch,
    github_updated_at: i64,
    now_ms: i64,
) -> Result<bool> {
    let changed = tx.execute(
        "INSERT INTO workflow_jobs
             (github_id, repository_id, run_id, name, status, conclusion,
              github_updated_at, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(github_id) DO UPDATE SET
             run_id = COALESCE(?3, workflow_jobs.run_id),
             name = COALESCE(?4, workflow_jobs.name),
             status = COALESCE(?5, workflow_jobs.status),
             conclusion = COALESCE(?6, workflow_jobs.conclusion),
             github_updated_at = ?7,
             updated_at = ?8
         WHERE ?7 >= workflow_jobs.github_updated_at",
        params![
            patch.github_id,
            repository_id.0,
            patch.run_id,
            patch.name,
            patch.status,
            patch.conclusion,
            github_updated_at,
            now_ms,
        ],
    )?;
    Ok(changed > 0)
}

// ─── Branches and commits ────────────────────────────────────────────────

pub fn upsert_branch(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    name: &str,
    head_sha: Option<&str>,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO branches (repository_id, name, head_sha, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(repository_id, name) DO UPDATE SET
             head_sha = COALESCE(?3, branches.head_sha),
             updated_at = ?4",
        params![repository_id.0, name, head_sha, now_ms],
    )?;
    Ok(())
}

/// Deletes a branch row. A branch never seen by the store deletes zero rows,
/// which is not an error.
pub fn delete_branch(tx: &Transaction<'_>, repository_id: RepositoryId, name: &str) -> Result<bool> {
    let deleted = tx.execute(
        "DELETE FROM branches WHERE repository_id = ?1 AND name = ?2",
        params![repository_id.0, name],
    )?;
    Ok(deleted > 0)
}

pub fn get_branch_head(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    name: &str,
) -> Result<Option<String>> {
    let head = tx
        .query_row(
            "SELECT head_sha FROM branches WHERE repository_id = ?1 AND name = ?2",
            params![repository_id.0, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(head.flatten())
}

/// Inserts a commit keyed by SHA. Re-inserting the same SHA is a no-op, which
/// makes push replay idempotent.
///
/// `author_login` is whatever text the push payload carried; push commit
/// authors lack stable ids, so no user row is linked.
pub fn insert_commit(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    sha: &str,
    message: Option<&str>,
    author_login: Option<&str>,
    authored_at: Option<i64>,
    now_ms: i64,
) -> Result<bool> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO commits
             (repository_id, sha, message, author_login, authored_at, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![repository_id.0, sha, message, author_login, authored_at, now_ms],
    )?;
    Ok(inserted > 0)
}

// ─── Members ─────────────────────────────────────────────────────────────

pub fn upsert_member(
    tx: &Transaction<'_>,
    repository_id: RepositoryId,
    user_id: i64,
    login: &str,
    role: Option<&str>,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO members (repository_id, user_id, login, role, cached_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(repository_id, user_id) DO UPDATE SET
             login = excluded.login,
             role = COALESCE(?4, members.role),
             updated_at = excluded.updated_at",
        params![repository_id.0, user_id, login, role, now_ms],
    )?;
    Ok(())
}

pub fn delete_member(tx: &Transaction<'_>, repository_id: RepositoryId, user_id: i64) -> Result<bool> {
    let deleted = tx.execute(
        "DELETE FROM members WHERE repository_id = ?1 AND user_id = ?2",
        params![repository_id.0, user_id],
    )?;
    Ok(deleted > 0)
}
