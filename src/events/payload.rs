//! Defensive accessors for raw webhook payloads.
//!
//! GitHub payloads are large and loosely versioned; handlers only ever need a
//! handful of fields. These helpers read paths out of a `serde_json::Value`
//! and treat anything missing or mistyped as absent - a malformed field is
//! never a fatal error, so one odd payload cannot wedge the queue.

use chrono::DateTime;
use serde_json::Value;

use crate::store::entities::UserPatch;

/// Walks a path of object keys. Returns `None` if any step is missing or not
/// an object.
pub fn get<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

/// String field at path, or `None`.
pub fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    get(value, path)?.as_str()
}

/// Integer field at path, or `None`.
pub fn i64_at(value: &Value, path: &[&str]) -> Option<i64> {
    get(value, path)?.as_i64()
}

/// Boolean field at path, or `None`.
pub fn bool_at(value: &Value, path: &[&str]) -> Option<bool> {
    get(value, path)?.as_bool()
}

/// Array field at path, or `None`.
pub fn array_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Vec<Value>> {
    get(value, path)?.as_array()
}

/// Remote timestamp at path, normalized to unix milliseconds.
///
/// GitHub sends ISO 8601 strings almost everywhere and unix *seconds* in a
/// few legacy spots (`pushed_at`), so both are accepted.
pub fn timestamp_at(value: &Value, path: &[&str]) -> Option<i64> {
    match get(value, path)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        Value::Number(n) => n.as_i64().map(|secs| secs * 1000),
        _ => None,
    }
}

/// User object at path, if it has the two fields we require (id and login).
pub fn user_at(value: &Value, path: &[&str]) -> Option<UserPatch> {
    let user = get(value, path)?;
    Some(UserPatch {
        github_id: user.get("id")?.as_i64()?,
        login: user.get("login")?.as_str()?.to_string(),
        avatar_url: user
            .get("avatar_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        kind: user.get("type").and_then(Value::as_str).map(str::to_string),
    })
}

/// Label names at path: an array of `{name}` objects or bare strings.
/// Elements of any other shape are skipped.
pub fn label_names_at(value: &Value, path: &[&str]) -> Option<Vec<String>> {
    let labels = array_at(value, path)?;
    Some(
        labels
            .iter()
            .filter_map(|label| match label {
                Value::String(s) => Some(s.clone()),
                other => other
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
            .collect(),
    )
}

/// Logins from an array of user objects at path.
pub fn logins_at(value: &Value, path: &[&str]) -> Option<Vec<String>> {
    let users = array_at(value, path)?;
    Some(
        users
            .iter()
            .filter_map(|user| user.get("login").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

/// Serializes a string list as a JSON array (the storage shape for labels,
/// assignees, and requested reviewers).
pub fn to_json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Branch name from a git ref, if the ref names a branch.
///
/// `refs/heads/main` → `main`; tags and other refs return `None`.
pub fn branch_from_ref(git_ref: &str) -> Option<&str> {
    git_ref.strip_prefix("refs/heads/")
}
