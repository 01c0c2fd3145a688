//! JSON-RPC error mapping
//!
//! Validation failures are the caller's fault and map to `INVALID_PARAMS`;
//! missing nodes get their own application code so clients can tell them
//! apart from generic failures.

use crate::activations::hierarchy::NodeError;
use jsonrpsee::types::ErrorObjectOwned;
use serde_json::json;

/// Standard JSON-RPC 2.0 error codes, plus application codes
pub mod codes {
    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Referenced node or parent does not exist
    pub const NOT_FOUND: i32 = -32004;
}

impl From<NodeError> for ErrorObjectOwned {
    fn from(err: NodeError) -> Self {
        let (code, kind) = match &err {
            NodeError::Validation(_) => (codes::INVALID_PARAMS, "validation"),
            NodeError::NotFound(_) => (codes::NOT_FOUND, "not_found"),
            NodeError::Storage(_) => (codes::INTERNAL_ERROR, "storage"),
        };
        ErrorObjectOwned::owned(code, err.to_string(), Some(json!({ "kind": kind })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_follow_taxonomy() {
        let err: ErrorObjectOwned = NodeError::Validation("bad type".into()).into();
        assert_eq!(err.code(), codes::INVALID_PARAMS);
        assert!(err.message().contains("bad type"));

        let err: ErrorObjectOwned = NodeError::NotFound("Node not found: 9".into()).into();
        assert_eq!(err.code(), codes::NOT_FOUND);

        let err: ErrorObjectOwned = NodeError::Storage("disk".into()).into();
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
    }
}
