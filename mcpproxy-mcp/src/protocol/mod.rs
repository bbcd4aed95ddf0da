//! MCP wire protocol: JSON-RPC 2.0 framing plus the message subset the
//! proxy exchanges with upstreams.

pub mod jsonrpc;
pub mod messages;

pub use jsonrpc::{JsonRpcError, JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
pub use messages::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, ServerCapabilities,
    ServerInfo, Tool, ToolAnnotations, ToolContent, ToolsCallParams, ToolsCallResult,
    ToolsListResult,
};
