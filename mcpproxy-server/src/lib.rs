//! mcpproxy server: listener mux, proxy tool surface, and control plane
//!
//! The binary wires an [`mcpproxy_mcp::UpstreamManager`] full of upstream
//! clients to one MCP endpoint plus a REST/SSE control plane, served
//! simultaneously over TCP and a local IPC socket.

pub mod activity;
pub mod error;
pub mod events;
pub mod indexer;
pub mod listener;
pub mod mcp_endpoint;
pub mod proxy;
pub mod rest;
pub mod session;
pub mod state;
pub mod stats;

pub use error::{ServerError, ServerResult};
pub use state::AppState;

/// Exit code for configuration errors
pub const EXIT_BAD_CONFIG: i32 = 2;

/// Exit code for data-directory permission errors
pub const EXIT_PERMISSION: i32 = 5;
