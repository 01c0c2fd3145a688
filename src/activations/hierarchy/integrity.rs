//! Whole-store invariant audit
//!
//! Rebuilds the expected closure and paths from the `parent_id` column in
//! memory and compares them with what is stored. Meant for administrative
//! checks and tests, not for the request path.

use super::closure;
use super::storage::NodeStore;
use super::types::{NodeError, NodeId, NodeKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A single broken invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// An ancestor edge (or the self edge, at depth 0) is absent
    MissingEdge {
        ancestor: NodeId,
        descendant: NodeId,
        depth: i64,
    },
    /// An edge links two nodes that are not ancestor and descendant
    UnexpectedEdge {
        ancestor: NodeId,
        descendant: NodeId,
        depth: i64,
    },
    /// The edge exists with the wrong hop count
    WrongDepth {
        ancestor: NodeId,
        descendant: NodeId,
        expected: i64,
        actual: i64,
    },
    PathMismatch {
        node: NodeId,
        expected: String,
        actual: String,
    },
    /// Parent pointers loop or lead to a missing node
    BrokenAncestry { node: NodeId },
    MissingAttributes { node: NodeId, table: String },
    /// Attribute row for a missing node, or in the wrong type's table
    StrayAttributes { node: NodeId, table: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub nodes_checked: usize,
    pub edges_checked: usize,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

struct NodeRow {
    name: String,
    path: String,
    kind: Option<NodeKind>,
    parent: Option<NodeId>,
}

impl NodeStore {
    /// Audit reflexivity, closure completeness, path consistency and type
    /// attachment over the whole store
    pub async fn integrity_check(&self) -> Result<IntegrityReport, NodeError> {
        let mut conn = self.pool().acquire().await?;

        let rows = sqlx::query("SELECT id, name, path, node_type, parent_id FROM nodes")
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| format!("Failed to load nodes: {}", e))?;

        let mut nodes = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node_type: String = row.try_get("node_type")?;
            let parent: Option<i64> = row.try_get("parent_id")?;
            nodes.insert(
                NodeId::new(row.try_get("id")?),
                NodeRow {
                    name: row.try_get("name")?,
                    path: row.try_get("path")?,
                    kind: node_type.parse().ok(),
                    parent: parent.map(NodeId::new),
                },
            );
        }

        let edges = closure::all_edges(&mut conn).await?;
        let mut report = IntegrityReport {
            nodes_checked: nodes.len(),
            edges_checked: edges.len(),
            violations: Vec::new(),
        };

        let mut expected: HashMap<(NodeId, NodeId), i64> = HashMap::new();
        let mut ids: Vec<NodeId> = nodes.keys().copied().collect();
        ids.sort();

        for id in &ids {
            let Some(chain) = ancestry(&nodes, *id) else {
                report.violations.push(Violation::BrokenAncestry { node: *id });
                continue;
            };

            // chain runs from the node up to its root
            for (depth, ancestor) in chain.iter().enumerate() {
                expected.insert((*ancestor, *id), depth as i64);
            }

            let expected_path = super::path::from_names(
                chain.iter().rev().map(|a| nodes[a].name.as_str()),
            );
            let node = &nodes[id];
            if node.path != expected_path {
                report.violations.push(Violation::PathMismatch {
                    node: *id,
                    expected: expected_path,
                    actual: node.path.clone(),
                });
            }
        }

        let mut seen = HashSet::with_capacity(edges.len());
        for edge in &edges {
            let key = (edge.ancestor, edge.descendant);
            seen.insert(key);
            match expected.get(&key) {
                Some(depth) if *depth == edge.depth => {}
                Some(depth) => report.violations.push(Violation::WrongDepth {
                    ancestor: edge.ancestor,
                    descendant: edge.descendant,
                    expected: *depth,
                    actual: edge.depth,
                }),
                None => report.violations.push(Violation::UnexpectedEdge {
                    ancestor: edge.ancestor,
                    descendant: edge.descendant,
                    depth: edge.depth,
                }),
            }
        }

        let mut missing: Vec<(NodeId, NodeId, i64)> = expected
            .iter()
            .filter(|(key, _)| !seen.contains(*key))
            .map(|((ancestor, descendant), depth)| (*descendant, *ancestor, *depth))
            .collect();
        missing.sort();
        report.violations.extend(missing.into_iter().map(
            |(descendant, ancestor, depth)| Violation::MissingEdge {
                ancestor,
                descendant,
                depth,
            },
        ));

        for kind in NodeKind::ALL {
            let sql = format!("SELECT node_id FROM {} ORDER BY node_id", kind.table());
            let attached = sqlx::query(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| format!("Failed to load {}: {}", kind.table(), e))?
                .iter()
                .map(|row| Ok(NodeId::new(row.try_get("node_id")?)))
                .collect::<Result<HashSet<NodeId>, NodeError>>()?;

            for id in &ids {
                if nodes[id].kind == Some(kind) && !attached.contains(id) {
                    report.violations.push(Violation::MissingAttributes {
                        node: *id,
                        table: kind.table().to_string(),
                    });
                }
            }

            let mut stray: Vec<NodeId> = attached
                .into_iter()
                .filter(|id| nodes.get(id).map_or(true, |n| n.kind != Some(kind)))
                .collect();
            stray.sort();
            report
                .violations
                .extend(stray.into_iter().map(|node| Violation::StrayAttributes {
                    node,
                    table: kind.table().to_string(),
                }));
        }

        if !report.is_clean() {
            warn!(
                violations = report.violations.len(),
                nodes = report.nodes_checked,
                "integrity check found violations"
            );
        }
        Ok(report)
    }
}

/// `id` followed by its ancestors up to the root, or `None` if the parent
/// pointers cycle or dangle
fn ancestry(nodes: &HashMap<NodeId, NodeRow>, id: NodeId) -> Option<Vec<NodeId>> {
    let mut chain = vec![id];
    let mut current = nodes.get(&id)?.parent;
    while let Some(parent) = current {
        if chain.contains(&parent) || chain.len() > nodes.len() {
            return None;
        }
        chain.push(parent);
        current = nodes.get(&parent)?.parent;
    }
    Some(chain)
}
