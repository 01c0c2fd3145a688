//! JSON-RPC plumbing shared by activations

pub mod errors;

use schemars::Schema;
use serde::{Deserialize, Serialize};

/// Description of one registered RPC method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSchema {
    /// Full method name, `<namespace>_<method>`
    pub name: String,
    pub description: String,
    /// JSON schema of the named parameters object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Schema>,
}

impl MethodSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Schema) -> Self {
        self.params = Some(params);
        self
    }
}
