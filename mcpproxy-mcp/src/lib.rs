//! MCP upstream connectivity for mcpproxy
//!
//! This crate owns the client half of the proxy: JSON-RPC and MCP message
//! types, the stdio/HTTP/SSE/streamable-HTTP transports, the per-upstream
//! connection state machine, and the manager that keeps every configured
//! upstream connected and its tools published.

pub mod backoff;
pub mod client;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod stderr;
pub mod transport;

pub use client::{ConnectionState, OAuthBroker, StateTransition, UpstreamClient};
pub use error::{McpError, McpResult};
pub use manager::{
    describe_tool, parse_tool_id, tool_id, ToolDescriptor, UpstreamEvent, UpstreamManager,
    UpstreamStatus,
};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, Tool, ToolAnnotations, ToolContent,
    ToolsCallResult, ToolsListResult,
};
pub use stderr::StderrRing;
pub use transport::{select_transport, UpstreamTransport};

/// MCP protocol revision spoken to upstreams
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Delimiter between server and tool in a fully qualified tool name
pub const TOOL_NAME_DELIMITER: &str = ":";

/// Default timeout for a single upstream request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Lines retained per upstream in the stderr ring
pub const STDERR_RING_CAPACITY: usize = 500;
