//! Hierarchical node store
//!
//! Clients, orders, parts, steel grades, trials and result files all live in
//! one tree. A closure table indexes every ancestor/descendant pair, each node
//! carries a materialized path, and each type keeps its attributes in a side
//! table.

mod activation;
mod attributes;
mod closure;
mod integrity;
pub mod path;
mod storage;
mod types;


pub use activation::Hierarchy;
pub use attributes::{
    Attributes, ClientAttributes, FileAttributes, NodePayload, OrderAttributes, PartAttributes,
    SteelAttributes, TrialAttributes,
};
pub use closure::ClosureEdge;
pub use integrity::{IntegrityReport, Violation};
pub use storage::{NodeStore, StoreConfig};
pub use types::{
    CountNodesRequest, CreateNodeRequest, DeletedNode, ListNodesRequest, MoveNodeRequest, NewNode,
    Node, NodeDetails, NodeDetailsRequest, NodeError, NodeFilter, NodeId, NodeKind,
    NodeRefRequest, NodeUpdate, Page, Pagination, SetStatusRequest, StatusUpdate, TablePage,
    TableRequest, TableRow, UpdateNodeRequest, DEFAULT_PAGE_SIZE,
};
