use super::storage::{NodeStore, StoreConfig};
use super::types::{
    CountNodesRequest, CreateNodeRequest, ListNodesRequest, MoveNodeRequest, NodeDetailsRequest,
    NodeError, NodeId, NodeKind, NodeRefRequest, SetStatusRequest, StatusUpdate, TableRequest,
    UpdateNodeRequest,
};
use crate::rpc::MethodSchema;
use jsonrpsee::core::RegisterMethodError;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use schemars::schema_for;
use std::sync::Arc;
use tracing::debug;

/// Hierarchy activation - exposes the node store over JSON-RPC
///
/// Every method takes a single named-parameter object and answers with one
/// result. Methods live under the `nodes` namespace (`nodes_list`,
/// `nodes_create`, ...).
#[derive(Clone)]
pub struct Hierarchy {
    storage: Arc<NodeStore>,
}

impl Hierarchy {
    pub const NAMESPACE: &'static str = "nodes";
    pub const VERSION: &'static str = "1.0.0";
    pub const DESCRIPTION: &'static str =
        "Client/order/part/steel/trial/file hierarchy backed by a closure table";

    /// Create a new Hierarchy activation with its own storage
    pub async fn new(config: StoreConfig) -> Result<Self, NodeError> {
        Ok(Self::with_storage(Arc::new(NodeStore::new(config).await?)))
    }

    /// Create a Hierarchy activation with a shared storage instance
    pub fn with_storage(storage: Arc<NodeStore>) -> Self {
        Self { storage }
    }

    /// Get the underlying storage (for sharing with other activations)
    pub fn storage(&self) -> Arc<NodeStore> {
        self.storage.clone()
    }

    /// Schemas of every method this activation registers
    pub fn method_schemas() -> Vec<MethodSchema> {
        vec![
            MethodSchema::new(
                "nodes_list",
                "List nodes of a type under an ancestor, at a depth, newest first",
            )
            .with_params(schema_for!(ListNodesRequest)),
            MethodSchema::new("nodes_details", "Get a node with its typed attributes")
                .with_params(schema_for!(NodeDetailsRequest)),
            MethodSchema::new("nodes_count", "Count nodes of a type under an ancestor")
                .with_params(schema_for!(CountNodesRequest)),
            MethodSchema::new(
                "nodes_create",
                "Create a node with its attributes below an optional parent",
            )
            .with_params(schema_for!(CreateNodeRequest)),
            MethodSchema::new(
                "nodes_update",
                "Rename a node, change its description or replace its attributes",
            )
            .with_params(schema_for!(UpdateNodeRequest)),
            MethodSchema::new("nodes_move", "Move a node and its subtree below another parent")
                .with_params(schema_for!(MoveNodeRequest)),
            MethodSchema::new("nodes_delete", "Delete a node and its whole subtree")
                .with_params(schema_for!(NodeRefRequest)),
            MethodSchema::new("nodes_wipe", "Delete every node, edge and attribute row"),
            MethodSchema::new("nodes_set_status", "Set the lifecycle tag of a node")
                .with_params(schema_for!(SetStatusRequest)),
            MethodSchema::new(
                "nodes_table",
                "Page through the direct children of a node, or the roots",
            )
            .with_params(schema_for!(TableRequest)),
            MethodSchema::new("nodes_ancestors", "Ancestry chain from the root to a node")
                .with_params(schema_for!(NodeRefRequest)),
            MethodSchema::new("nodes_integrity", "Audit closure, path and attribute invariants"),
        ]
    }

    /// Convert the activation into an RPC module
    pub fn into_rpc_module(self) -> Result<RpcModule<Arc<NodeStore>>, RegisterMethodError> {
        let mut module = RpcModule::new(self.storage);

        module.register_async_method("nodes_list", |params, store, _ext| async move {
            let req: ListNodesRequest = params.parse()?;
            let (filter, page) = req.into_query(store.config().max_page_size)?;
            debug!(?filter, ?page, "nodes_list");
            Ok::<_, ErrorObjectOwned>(store.node_list(filter, page).await?)
        })?;

        module.register_async_method("nodes_details", |params, store, _ext| async move {
            let req: NodeDetailsRequest = params.parse()?;
            let kind: NodeKind = req.node_type.parse()?;
            Ok::<_, ErrorObjectOwned>(store.node_details(NodeId::new(req.node_id), kind).await?)
        })?;

        module.register_async_method("nodes_count", |params, store, _ext| async move {
            let req: CountNodesRequest = params.parse()?;
            let filter = req.into_filter()?;
            Ok::<_, ErrorObjectOwned>(store.node_count(filter).await?)
        })?;

        module.register_async_method("nodes_create", |params, store, _ext| async move {
            let req: CreateNodeRequest = params.parse()?;
            Ok::<_, ErrorObjectOwned>(store.node_create(req.into()).await?)
        })?;

        module.register_async_method("nodes_update", |params, store, _ext| async move {
            let req: UpdateNodeRequest = params.parse()?;
            let (id, update) = req.into_update();
            Ok::<_, ErrorObjectOwned>(store.node_update(id, update).await?)
        })?;

        module.register_async_method("nodes_move", |params, store, _ext| async move {
            let req: MoveNodeRequest = params.parse()?;
            let parent = NodeId::optional(req.parent_id);
            Ok::<_, ErrorObjectOwned>(store.node_move(NodeId::new(req.node_id), parent).await?)
        })?;

        module.register_async_method("nodes_delete", |params, store, _ext| async move {
            let req: NodeRefRequest = params.parse()?;
            Ok::<_, ErrorObjectOwned>(store.node_delete(NodeId::new(req.node_id)).await?)
        })?;

        module.register_async_method("nodes_wipe", |_params, store, _ext| async move {
            Ok::<_, ErrorObjectOwned>(store.node_wipe().await?)
        })?;

        module.register_async_method("nodes_set_status", |params, store, _ext| async move {
            let req: SetStatusRequest = params.parse()?;
            let node_id = NodeId::new(req.node_id);
            let data_status = store.node_set_status(node_id, &req.status).await?;
            Ok::<_, ErrorObjectOwned>(StatusUpdate {
                node_id,
                data_status,
            })
        })?;

        module.register_async_method("nodes_table", |params, store, _ext| async move {
            // every field is optional, so a bare call lists the roots
            let req: TableRequest = params.parse::<Option<TableRequest>>()?.unwrap_or_default();
            let (parent, page_number, page) = req.into_query(store.config().max_page_size)?;
            Ok::<_, ErrorObjectOwned>(store.node_table(parent, page_number, page).await?)
        })?;

        module.register_async_method("nodes_ancestors", |params, store, _ext| async move {
            let req: NodeRefRequest = params.parse()?;
            Ok::<_, ErrorObjectOwned>(store.node_ancestors(NodeId::new(req.node_id)).await?)
        })?;

        module.register_async_method("nodes_integrity", |_params, store, _ext| async move {
            Ok::<_, ErrorObjectOwned>(store.integrity_check().await?)
        })?;

        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_method_has_a_schema() {
        let schemas = Hierarchy::method_schemas();
        let names: Vec<&str> = schemas.iter().map(|m| m.name.as_str()).collect();
        for name in [
            "nodes_list",
            "nodes_details",
            "nodes_count",
            "nodes_create",
            "nodes_update",
            "nodes_move",
            "nodes_delete",
            "nodes_wipe",
            "nodes_set_status",
            "nodes_table",
            "nodes_ancestors",
            "nodes_integrity",
        ] {
            assert!(names.contains(&name), "missing schema for {}", name);
            assert!(name.starts_with(Hierarchy::NAMESPACE));
        }
        assert_eq!(schemas.len(), 12);
    }

    #[test]
    fn test_create_schema_describes_payload() {
        let schema = schema_for!(CreateNodeRequest);
        let value = serde_json::to_value(&schema).unwrap();
        let props = value.get("properties").expect("object schema");
        assert!(props.get("name").is_some());
        assert!(props.get("parentId").is_some());
        assert!(props.get("payload").is_some());
    }
}
