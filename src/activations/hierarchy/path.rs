//! Materialized paths
//!
//! A node's path is `/` followed by the names of its ancestors and itself,
//! joined by `/`. Names therefore may not contain the separator.

use super::types::{NodeError, NodeId};
use sqlx::sqlite::SqliteConnection;

pub const SEPARATOR: char = '/';

/// Trim and check a node name
pub fn validate_name(name: &str) -> Result<String, NodeError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NodeError::Validation("Node name must not be empty".into()));
    }
    if trimmed.contains(SEPARATOR) {
        return Err(NodeError::Validation(format!(
            "Node name must not contain '{}': {}",
            SEPARATOR, trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// Path of a node named `name` under a parent at `parent_path`
pub fn join(parent_path: Option<&str>, name: &str) -> String {
    format!("{}{}{}", parent_path.unwrap_or(""), SEPARATOR, name)
}

/// Path built from a root-first chain of names
pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().fold(String::new(), |mut path, name| {
        path.push(SEPARATOR);
        path.push_str(name);
        path
    })
}

/// Rewrite the path of every proper descendant of `root`
///
/// Each descendant path is `old_prefix + remainder`; the remainder is kept
/// and only the prefix is substituted, so one statement covers the whole
/// subtree and every row is touched exactly once.
pub(crate) async fn rewrite_descendants(
    conn: &mut SqliteConnection,
    root: NodeId,
    old_prefix: &str,
    new_prefix: &str,
    now: i64,
) -> Result<u64, NodeError> {
    // SQLite substr() is 1-based and counts characters
    let remainder_start = i64::try_from(old_prefix.chars().count())
        .map_err(|_| NodeError::Storage("Path too long".into()))?
        + 1;

    let result = sqlx::query(
        "UPDATE nodes SET path = ? || substr(path, ?), modified_at = ?
         WHERE id IN (
             SELECT descendant_id FROM node_closure WHERE ancestor_id = ? AND depth > 0
         )",
    )
    .bind(new_prefix)
    .bind(remainder_start)
    .bind(now)
    .bind(root.get())
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to rewrite descendant paths: {}", e))?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Gear-7 ").unwrap(), "Gear-7");
        assert!(validate_name("   ").unwrap_err().is_validation());
        assert!(validate_name("a/b").unwrap_err().is_validation());
    }

    #[test]
    fn test_join_and_from_names_agree() {
        assert_eq!(join(None, "Acme"), "/Acme");
        assert_eq!(join(Some("/Acme"), "Order-1"), "/Acme/Order-1");
        assert_eq!(from_names(["Acme", "Order-1", "Gear-7"]), "/Acme/Order-1/Gear-7");
        assert_eq!(from_names(Vec::<&str>::new()), "");
    }
}
