//! The protocol core: MCP over JSON-RPC 2.0 and the tool catalogue it serves.
//!
//! Transport-agnostic. A transport calls [`McpCore::establish`] with its push
//! sink and feeds raw inbound frames into the returned connection.

pub mod catalogue;
pub mod engine;
pub mod rpc;

pub use catalogue::{Tool, ToolCatalogue, ToolDefinition, ToolError};
pub use engine::{McpConnection, McpCore, ServerInfo, PROTOCOL_VERSION};
