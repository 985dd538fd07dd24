//! MCP wire layer for the Lattice orchestration server: JSON-RPC framing,
//! the tool registry, parameter coercion and the response envelope.

pub mod coerce;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod server;
pub mod state;
pub mod tools;

pub use envelope::Envelope;
pub use error::McpError;
pub use server::{McpServer, ServerContext, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER};
pub use state::{AppState, StateConfig};
