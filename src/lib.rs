pub mod activations;
pub mod builder;
pub mod config;
pub mod rpc;

// Re-export commonly used items
pub use activations::hierarchy::{Hierarchy, NodeError, NodeStore, StoreConfig};
pub use builder::build_rpc_module;
pub use config::HubConfig;
