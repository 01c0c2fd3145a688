use super::attributes::NodePayload;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Types
// ============================================================================

/// Surrogate key of a node row
///
/// Ids are assigned by SQLite (`AUTOINCREMENT`) and never reused. `0` is never
/// a valid id; request types treat it as "no node" where an id is optional.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Interpret an optional wire id, mapping `0` to `None`
    pub fn optional(id: Option<i64>) -> Option<Self> {
        id.filter(|id| *id != 0).map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type discriminator
///
/// Determines which side table holds the node's typed attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Client,
    Order,
    Part,
    Steel,
    Trial,
    File,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Client,
        NodeKind::Order,
        NodeKind::Part,
        NodeKind::Steel,
        NodeKind::Trial,
        NodeKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Client => "client",
            NodeKind::Order => "order",
            NodeKind::Part => "part",
            NodeKind::Steel => "steel",
            NodeKind::Trial => "trial",
            NodeKind::File => "file",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| NodeError::Validation(format!("Unknown node type: {}", s)))
    }
}

/// A node in the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,

    pub name: String,

    /// Materialized `/`-joined chain of ancestor names, e.g. `/Acme/Order-1`
    pub path: String,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// Parent node (None for roots)
    pub parent_id: Option<NodeId>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last mutation timestamp (Unix milliseconds)
    pub modified_at: i64,

    /// Lifecycle tag owned by callers, stored verbatim
    pub data_status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A node joined with its typed attributes
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub node: Node,
    pub payload: NodePayload,
}

/// Input for creating a node
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub payload: NodePayload,
    pub description: Option<String>,
}

impl NewNode {
    pub fn root(name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            name: name.into(),
            parent: None,
            payload,
            description: None,
        }
    }

    pub fn child(name: impl Into<String>, parent: NodeId, payload: NodePayload) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent),
            payload,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update of a node. `None` fields are left untouched.
///
/// An empty `description` clears it.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub payload: Option<NodePayload>,
}

/// Which nodes a list or count covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFilter {
    /// Restrict to descendants of this node; `None` searches the whole forest
    pub ancestor: Option<NodeId>,
    pub kind: NodeKind,
    /// Hop distance from `ancestor`; without an ancestor, from any node above
    /// (`0` is the node itself). `None` means any proper descendant, or any
    /// node when there is no ancestor.
    pub depth: Option<u32>,
}

impl NodeFilter {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            ancestor: None,
            kind,
            depth: None,
        }
    }

    pub fn under(mut self, ancestor: NodeId) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }
}

/// Offset pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

/// One row of the hierarchy table view
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub node: Node,
    pub child_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: u32, limit: u32) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            total,
            page,
            limit,
            total_pages: (total + limit_i - 1) / limit_i,
        }
    }
}

/// A page of direct children with pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    pub rows: Vec<TableRow>,
    pub pagination: Pagination,
}

/// Result of a cascade delete
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedNode {
    pub id: NodeId,
    /// Number of nodes removed, the root included
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub node_id: NodeId,
    pub data_status: String,
}

// ============================================================================
// Requests
// ============================================================================

/// Page size used when a request omits `limit`
pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListNodesRequest {
    /// Ancestor to search under; absent or `0` searches the whole forest
    #[serde(default)]
    pub ancestor_id: Option<i64>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub depth: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ListNodesRequest {
    pub fn into_query(self, max_page_size: u32) -> Result<(NodeFilter, Page), NodeError> {
        let filter = parse_filter(self.ancestor_id, &self.node_type, self.depth)?;
        let limit = check_limit(self.limit, max_page_size)?;
        let offset = check_non_negative("offset", self.offset.unwrap_or(0))?;
        Ok((filter, Page::new(limit, offset)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CountNodesRequest {
    #[serde(default)]
    pub ancestor_id: Option<i64>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub depth: Option<i64>,
}

impl CountNodesRequest {
    pub fn into_filter(self) -> Result<NodeFilter, NodeError> {
        parse_filter(self.ancestor_id, &self.node_type, self.depth)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetailsRequest {
    pub node_id: i64,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub name: String,
    /// Parent node; absent or `0` creates a root
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    pub payload: NodePayload,
}

impl From<CreateNodeRequest> for NewNode {
    fn from(req: CreateNodeRequest) -> Self {
        NewNode {
            name: req.name,
            parent: NodeId::optional(req.parent_id),
            payload: req.payload,
            description: req.description,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeRequest {
    pub node_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payload: Option<NodePayload>,
}

impl UpdateNodeRequest {
    pub fn into_update(self) -> (NodeId, NodeUpdate) {
        (
            NodeId::new(self.node_id),
            NodeUpdate {
                name: self.name,
                description: self.description,
                payload: self.payload,
            },
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveNodeRequest {
    pub node_id: i64,
    /// New parent; absent or `0` makes the node a root
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeRefRequest {
    pub node_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusRequest {
    pub node_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// 1-based page number, defaults to 1
    #[serde(default)]
    pub page: Option<i64>,
}

impl TableRequest {
    /// Returns the parent, the validated page number and the window it covers
    pub fn into_query(
        self,
        max_page_size: u32,
    ) -> Result<(Option<NodeId>, u32, Page), NodeError> {
        let limit = check_limit(self.limit, max_page_size)?;
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(NodeError::Validation(format!(
                "page must be at least 1, got {}",
                page
            )));
        }
        let page = u32::try_from(page)
            .map_err(|_| NodeError::Validation(format!("page out of range: {}", page)))?;
        let offset = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| NodeError::Validation(format!("page out of range: {}", page)))?;
        Ok((
            NodeId::optional(self.parent_id),
            page,
            Page::new(limit, offset),
        ))
    }
}

fn parse_filter(
    ancestor_id: Option<i64>,
    node_type: &str,
    depth: Option<i64>,
) -> Result<NodeFilter, NodeError> {
    let kind = node_type.parse::<NodeKind>()?;
    let depth = depth
        .map(|d| check_non_negative("depth", d))
        .transpose()?;
    Ok(NodeFilter {
        ancestor: NodeId::optional(ancestor_id),
        kind,
        depth,
    })
}

fn check_limit(limit: Option<i64>, max_page_size: u32) -> Result<u32, NodeError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE.min(i64::from(max_page_size)));
    if limit < 1 || limit > i64::from(max_page_size) {
        return Err(NodeError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            max_page_size, limit
        )));
    }
    // bounded by max_page_size above
    Ok(limit as u32)
}

fn check_non_negative(field: &str, value: i64) -> Result<u32, NodeError> {
    u32::try_from(value).map_err(|_| {
        NodeError::Validation(format!("{} must be a non-negative integer, got {}", field, value))
    })
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for hierarchy operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum NodeError {
    /// Malformed input, detected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure; the enclosing transaction has been rolled back
    #[error("Storage error: {0}")]
    Storage(String),
}

impl NodeError {
    pub fn node_not_found(id: NodeId) -> Self {
        NodeError::NotFound(format!("Node not found: {}", id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, NodeError::Validation(_))
    }
}

impl From<sqlx::Error> for NodeError {
    fn from(e: sqlx::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Storage(format!("Invalid JSON column: {}", e))
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        NodeError::Storage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_tag() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!("furnace".parse::<NodeKind>().unwrap_err().is_validation());
    }

    #[test]
    fn test_list_request_validation() {
        let req = ListNodesRequest {
            ancestor_id: Some(0),
            node_type: "part".to_string(),
            depth: Some(2),
            limit: Some(10),
            offset: None,
        };
        let (filter, page) = req.into_query(100).unwrap();
        assert_eq!(filter.ancestor, None);
        assert_eq!(filter.kind, NodeKind::Part);
        assert_eq!(filter.depth, Some(2));
        assert_eq!(page, Page::new(10, 0));

        let negative_depth = ListNodesRequest {
            ancestor_id: None,
            node_type: "part".to_string(),
            depth: Some(-1),
            limit: None,
            offset: None,
        };
        assert!(negative_depth.into_query(100).unwrap_err().is_validation());

        let too_large = ListNodesRequest {
            ancestor_id: None,
            node_type: "part".to_string(),
            depth: None,
            limit: Some(101),
            offset: None,
        };
        assert!(too_large.into_query(100).unwrap_err().is_validation());

        let negative_offset = ListNodesRequest {
            ancestor_id: None,
            node_type: "order".to_string(),
            depth: None,
            limit: Some(5),
            offset: Some(-5),
        };
        assert!(negative_offset.into_query(100).unwrap_err().is_validation());
    }

    #[test]
    fn test_table_request_pages() {
        let req = TableRequest {
            parent_id: Some(7),
            limit: Some(20),
            page: Some(3),
        };
        let (parent, page, window) = req.into_query(100).unwrap();
        assert_eq!(parent, Some(NodeId::new(7)));
        assert_eq!(page, 3);
        assert_eq!(window, Page::new(20, 40));

        let zero = TableRequest {
            parent_id: None,
            limit: Some(20),
            page: Some(0),
        };
        assert!(zero.into_query(100).unwrap_err().is_validation());
    }

    #[test]
    fn test_pagination_rounds_up() {
        assert_eq!(Pagination::new(0, 1, 10).total_pages, 0);
        assert_eq!(Pagination::new(10, 1, 10).total_pages, 1);
        assert_eq!(Pagination::new(11, 1, 10).total_pages, 2);
    }
}
