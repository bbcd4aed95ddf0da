//! Client-side transports for upstream MCP servers

pub mod http;
pub mod sse;
pub mod stdio;

pub use http::{parse_resource_metadata, HttpTransport};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::stderr::StderrRing;
use mcpproxy_config::{Protocol, UpstreamConfig};

/// Transport trait for talking to one upstream MCP server.
///
/// Implementations own the connection; callers serialize access through the
/// owning [`crate::client::UpstreamClient`].
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Establish the connection (spawn the subprocess, open the stream)
    async fn connect(&mut self) -> McpResult<()>;

    /// Send a request and wait for the matching response
    async fn request(&mut self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn notify(&mut self, notification: JsonRpcRequest) -> McpResult<()>;

    /// Whether the transport currently holds a live connection
    fn is_connected(&self) -> bool;

    /// Close the connection and release resources
    async fn close(&mut self) -> McpResult<()>;
}

/// Pick and build a transport for an upstream configuration.
///
/// `auto` resolves to stdio when a command is configured. For URLs it
/// prefers streamable-http when the path looks like an MCP endpoint
/// (`/mcp` suffix or no path at all), and plain HTTP otherwise. SSE is
/// explicit opt-in only.
pub fn select_transport(
    config: &UpstreamConfig,
    stderr: Arc<StderrRing>,
) -> McpResult<Box<dyn UpstreamTransport>> {
    let resolved = resolve_protocol(config)?;

    match resolved {
        Protocol::Stdio => {
            let command = config.command.clone().ok_or_else(|| McpError::Configuration {
                message: "stdio transport requires a command".to_string(),
            })?;
            Ok(Box::new(StdioTransport::new(
                command,
                config.args.clone(),
                config.env.clone(),
                stderr,
            )?))
        }
        Protocol::Http => Ok(Box::new(HttpTransport::new(
            required_url(config)?,
            config.headers.clone(),
            false,
        )?)),
        Protocol::StreamableHttp => Ok(Box::new(HttpTransport::new(
            required_url(config)?,
            config.headers.clone(),
            true,
        )?)),
        Protocol::Sse => Ok(Box::new(SseTransport::new(
            required_url(config)?,
            config.headers.clone(),
        )?)),
        Protocol::Auto => unreachable!("auto resolved above"),
    }
}

/// Resolve `auto` into a concrete protocol
pub fn resolve_protocol(config: &UpstreamConfig) -> McpResult<Protocol> {
    match config.protocol {
        Protocol::Auto => {
            if config.command.is_some() {
                return Ok(Protocol::Stdio);
            }
            let url = required_url(config)?;
            let parsed = url::Url::parse(&url).map_err(|e| McpError::Configuration {
                message: format!("invalid upstream url: {}", e),
            })?;
            let path = parsed.path().trim_end_matches('/');
            if path.is_empty() || path.ends_with("/mcp") || path == "/mcp" {
                Ok(Protocol::StreamableHttp)
            } else {
                Ok(Protocol::Http)
            }
        }
        other => Ok(other),
    }
}

fn required_url(config: &UpstreamConfig) -> McpResult<String> {
    config.url.clone().ok_or_else(|| McpError::Configuration {
        message: "HTTP-family transport requires a url".to_string(),
    })
}
