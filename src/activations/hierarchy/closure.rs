//! Closure table maintenance
//!
//! `node_closure` holds one `(ancestor, descendant, depth)` row for every
//! ancestor of every node, the node itself included at depth 0. All functions
//! run on the caller's connection so they compose inside one transaction.

use super::attributes::{placeholders, ID_CHUNK};
use super::types::{NodeError, NodeId};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

pub(crate) const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS node_closure (
        ancestor_id INTEGER NOT NULL REFERENCES nodes(id),
        descendant_id INTEGER NOT NULL REFERENCES nodes(id),
        depth INTEGER NOT NULL CHECK (depth >= 0),
        PRIMARY KEY (ancestor_id, descendant_id)
    );

    CREATE INDEX IF NOT EXISTS idx_closure_descendant ON node_closure(descendant_id, depth);
    CREATE INDEX IF NOT EXISTS idx_closure_ancestor_depth ON node_closure(ancestor_id, depth);
"#;

/// A single closure row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureEdge {
    pub ancestor: NodeId,
    pub descendant: NodeId,
    pub depth: i64,
}

/// Insert the reflexive `(id, id, 0)` edge
pub(crate) async fn insert_self(conn: &mut SqliteConnection, id: NodeId) -> Result<(), NodeError> {
    sqlx::query("INSERT INTO node_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, 0)")
        .bind(id.get())
        .bind(id.get())
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to insert self edge: {}", e))?;
    Ok(())
}

/// Link a freshly inserted leaf below `parent`
///
/// Every edge ending at the parent (its ancestors and itself) is copied one
/// level deeper onto the new node. Returns the number of edges written.
pub(crate) async fn attach_leaf(
    conn: &mut SqliteConnection,
    id: NodeId,
    parent: NodeId,
) -> Result<u64, NodeError> {
    let result = sqlx::query(
        "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
         SELECT ancestor_id, ?, depth + 1 FROM node_closure WHERE descendant_id = ?",
    )
    .bind(id.get())
    .bind(parent.get())
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to insert ancestor edges: {}", e))?;

    Ok(result.rows_affected())
}

/// Ids of the subtree rooted at `root`, root included, deepest first
pub(crate) async fn subtree(
    conn: &mut SqliteConnection,
    root: NodeId,
) -> Result<Vec<NodeId>, NodeError> {
    let rows = sqlx::query(
        "SELECT descendant_id FROM node_closure WHERE ancestor_id = ? ORDER BY depth DESC, descendant_id",
    )
    .bind(root.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| format!("Failed to fetch subtree: {}", e))?;

    rows.iter()
        .map(|row| Ok::<_, NodeError>(NodeId::new(row.try_get("descendant_id")?)))
        .collect()
}

/// True when `candidate` lies in the subtree of `ancestor` (itself included)
pub(crate) async fn is_within(
    conn: &mut SqliteConnection,
    ancestor: NodeId,
    candidate: NodeId,
) -> Result<bool, NodeError> {
    let row = sqlx::query(
        "SELECT 1 FROM node_closure WHERE ancestor_id = ? AND descendant_id = ?",
    )
    .bind(ancestor.get())
    .bind(candidate.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| format!("Failed to check ancestry: {}", e))?;

    Ok(row.is_some())
}

/// Cut the subtree of `root` loose from everything above it
///
/// Deletes the edges whose descendant is inside the subtree and whose
/// ancestor is outside it. Edges internal to the subtree are kept, so relative
/// depths survive a move.
pub(crate) async fn detach_subtree(
    conn: &mut SqliteConnection,
    root: NodeId,
) -> Result<u64, NodeError> {
    let result = sqlx::query(
        "DELETE FROM node_closure
         WHERE descendant_id IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?)
           AND ancestor_id NOT IN (SELECT descendant_id FROM node_closure WHERE ancestor_id = ?)",
    )
    .bind(root.get())
    .bind(root.get())
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to detach subtree: {}", e))?;

    Ok(result.rows_affected())
}

/// Hang a detached subtree below `parent`
///
/// Cross product of the parent's ancestor chain with the subtree's own edges:
/// `(A, parent, d1) x (root, D, d2) -> (A, D, d1 + d2 + 1)`.
pub(crate) async fn graft_subtree(
    conn: &mut SqliteConnection,
    root: NodeId,
    parent: NodeId,
) -> Result<u64, NodeError> {
    let result = sqlx::query(
        "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
         SELECT above.ancestor_id, below.descendant_id, above.depth + below.depth + 1
         FROM node_closure AS above
         CROSS JOIN node_closure AS below
         WHERE above.descendant_id = ? AND below.ancestor_id = ?",
    )
    .bind(parent.get())
    .bind(root.get())
    .execute(&mut *conn)
    .await
    .map_err(|e| format!("Failed to graft subtree: {}", e))?;

    Ok(result.rows_affected())
}

/// Delete every edge whose descendant is one of `ids`
///
/// For a whole subtree this removes every edge touching it: in a tree an
/// ancestor inside the subtree only ever has descendants inside it too.
pub(crate) async fn remove_nodes(
    conn: &mut SqliteConnection,
    ids: &[NodeId],
) -> Result<u64, NodeError> {
    let mut removed = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let sql = format!(
            "DELETE FROM node_closure WHERE descendant_id IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id.get());
        }
        removed += query
            .execute(&mut *conn)
            .await
            .map_err(|e| format!("Failed to delete closure edges: {}", e))?
            .rows_affected();
    }
    Ok(removed)
}

/// Every edge ending at `id`, nearest ancestor first
pub(crate) async fn edges_to(
    conn: &mut SqliteConnection,
    id: NodeId,
) -> Result<Vec<ClosureEdge>, NodeError> {
    let rows = sqlx::query(
        "SELECT ancestor_id, descendant_id, depth FROM node_closure
         WHERE descendant_id = ? ORDER BY depth",
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| format!("Failed to fetch closure edges: {}", e))?;

    rows.iter().map(row_to_edge).collect()
}

/// The whole closure table
pub(crate) async fn all_edges(conn: &mut SqliteConnection) -> Result<Vec<ClosureEdge>, NodeError> {
    let rows = sqlx::query("SELECT ancestor_id, descendant_id, depth FROM node_closure")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| format!("Failed to fetch closure table: {}", e))?;

    rows.iter().map(row_to_edge).collect()
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<ClosureEdge, NodeError> {
    Ok(ClosureEdge {
        ancestor: NodeId::new(row.try_get("ancestor_id")?),
        descendant: NodeId::new(row.try_get("descendant_id")?),
        depth: row.try_get("depth")?,
    })
}
