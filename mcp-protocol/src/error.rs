//! Error handling for the MCP transport layer.
//!
//! Protocol-level failures (bad framing, unknown methods) become JSON-RPC
//! error objects; domain failures stay inside the response envelope and
//! never surface as JSON-RPC errors.

use serde_json::{json, Value};
use thiserror::Error;

/// Transport-level protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl McpError {
    /// JSON-RPC error code for this failure
    pub fn to_error_code(&self) -> i32 {
        match self {
            McpError::Protocol(_) => -32600,
            McpError::UnknownMethod(_) => -32601,
            McpError::UnknownTool(_) => -32602,
            McpError::Serialization(_) => -32700,
        }
    }

    /// Full JSON-RPC error response
    pub fn to_json_rpc_error(&self, id: Option<Value>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.to_error_code(),
                "message": self.to_string()
            },
            "id": id
        })
    }
}
