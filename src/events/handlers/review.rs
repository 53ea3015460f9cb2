//! Handler for `pull_request_review` events.

use rusqlite::Transaction;
use serde_json::Value;
use tracing::debug;

use crate::events::payload;
use crate::events::{ApplyCtx, Outcome};
use crate::projection::FeedEntry;
use crate::store::entities::{upsert_review, upsert_user, ReviewPatch};
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
    let Some(review_id) = payload::i64_at(payload, &["review", "id"]) else {
        debug!("pull_request_review event without review.id");
        return Ok(Outcome::noop());
    };
    let Some(pull_number) = payload::i64_at(payload, &["pull_request", "number"]) else {
        debug!("pull_request_review event without pull_request.number");
        return Ok(Outcome::noop());
    };

    let author = payload::user_at(payload, &["review", "user"]);
    if let Some(author) = &author {
        upsert_user(tx, author, ctx.now_ms)?;
    }

    let submitted_at = payload::timestamp_at(payload, &["review", "submitted_at"]);
    let state = payload::str_at(payload, &["review", "state"]).map(str::to_lowercase);
    let patch = ReviewPatch {
        github_id: review_id,
        pull_number,
        state: match action {
            // A dismissal overrides whatever state the review body carries.
            Some("dismissed") => Some("dismissed".to_string()),
            _ => state.clone(),
        },
        body: payload::str_at(payload, &["review", "body"]).map(str::to_string),
        author_id: author.as_ref().map(|a| a.github_id),
        author_login: author.as_ref().map(|a| a.login.clone()),
        submitted_at,
    };
    upsert_review(tx, repo, &patch, submitted_at.unwrap_or(0), ctx.now_ms)?;

    let feed = (action == Some("submitted")).then(|| FeedEntry {
        kind: "review_submitted".to_string(),
        title: format!(
            "Review on #{pull_number}: {}",
            state.as_deref().unwrap_or("commented")
        ),
        description: None,
        actor_login: author.as_ref().map(|a| a.login.clone()),
        actor_avatar_url: author.and_then(|a| a.avatar_url),
        entity_number: Some(pull_number),
    });

    Ok(match feed {
        Some(feed) => Outcome::touched(repo).with_feed(feed),
        None => Outcome::touched(repo),
    })
}
