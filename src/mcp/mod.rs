//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes the policy engine and the bounded executor as MCP tools over
//! line-delimited JSON-RPC on stdio.
//!
//! # Architecture
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types
//! 2. **Transport Layer** (`transport`): line-delimited reader and writer
//! 3. **Server Layer** (`server`): method dispatch and tools

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Transport layer: line-delimited stdio
pub mod transport;

// Server layer: dispatch and tools
pub mod server;

pub use protocol::{
    CallToolResult, Content, InitializeParams, InitializeResult, McpError, McpMethod, McpRequest,
    McpResponse, RequestId, ServerInfo, Tool, ToolCallParams,
};
pub use server::{CommandCheck, McpServer, SERVER_NAME};
pub use transport::{stdio, Incoming, MessageReader, MessageWriter};
