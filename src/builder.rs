//! Hub builder - assembles the JSON-RPC module served by the binary
//!
//! Used by both the main binary and the integration tests.

use std::sync::Arc;

use jsonrpsee::core::RegisterMethodError;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;

use crate::activations::hierarchy::{Hierarchy, NodeStore};

/// Build the root module with every activation merged in
///
/// The root itself provides one introspection method:
/// - hub_methods: schemas of every registered method
pub fn build_rpc_module(storage: Arc<NodeStore>) -> Result<RpcModule<()>, RegisterMethodError> {
    let mut module = RpcModule::new(());

    module.register_method("hub_methods", |_params, _ctx, _ext| {
        Ok::<_, ErrorObjectOwned>(Hierarchy::method_schemas())
    })?;

    module.merge(Hierarchy::with_storage(storage).into_rpc_module()?)?;

    Ok(module)
}
