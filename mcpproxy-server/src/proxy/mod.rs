//! The virtual MCP tool surface
//!
//! Five built-in tools (`retrieve_tools`, `call_tool`, `read_cache`,
//! `upstream_servers`, `quarantine_security`) plus `code_execution` make up
//! the proxy's own tool set. Security policy — quarantine enforcement and
//! the management predicates — lives here, in front of the upstream layer.

pub mod cache_read;
pub mod call;
pub mod code_exec;
pub mod quarantine;
pub mod retrieve;
pub mod servers;

use serde_json::{json, Value};
use std::sync::Arc;

use crate::activity::ActivitySource;
use crate::state::AppState;

/// Virtual tool names, case-sensitive
pub const RETRIEVE_TOOLS: &str = "retrieve_tools";
pub const CALL_TOOL: &str = "call_tool";
pub const READ_CACHE: &str = "read_cache";
pub const UPSTREAM_SERVERS: &str = "upstream_servers";
pub const QUARANTINE_SECURITY: &str = "quarantine_security";
pub const CODE_EXECUTION: &str = "code_execution";

/// Errors surfaced as JSON-RPC failures rather than tool payloads
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Bad arguments; maps to -32602
    InvalidParams(String),
    /// Unknown virtual tool; maps to -32601
    UnknownTool(String),
    /// Unexpected internal failure; maps to -32603
    Internal(String),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::InvalidParams(message) => write!(f, "invalid params: {}", message),
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {}", name),
            ToolError::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

pub type ToolResult = Result<Value, ToolError>;

/// Whether `name` is one of the proxy's own tools
pub fn is_proxy_tool(name: &str) -> bool {
    matches!(
        name,
        RETRIEVE_TOOLS
            | CALL_TOOL
            | READ_CACHE
            | UPSTREAM_SERVERS
            | QUARANTINE_SECURITY
            | CODE_EXECUTION
    )
}

/// The proxy tool surface over the shared state
#[derive(Clone)]
pub struct ProxyTools {
    state: Arc<AppState>,
}

impl ProxyTools {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Dispatch one virtual tool call and record it in the activity log
    pub async fn dispatch(&self, name: &str, args: Value, source: ActivitySource) -> ToolResult {
        let result = match name {
            RETRIEVE_TOOLS => retrieve::retrieve_tools(self, &args).await,
            CALL_TOOL => call::call_tool(self, &args, source).await,
            READ_CACHE => cache_read::read_cache(self, &args),
            UPSTREAM_SERVERS => servers::upstream_servers(self, &args).await,
            QUARANTINE_SECURITY => quarantine::quarantine_security(self, &args).await,
            CODE_EXECUTION => code_exec::code_execution(self, &args).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        };

        let (status, excerpt) = match &result {
            Ok(payload) => {
                let text = payload.to_string();
                let status = if payload.get("error").is_some() {
                    "error"
                } else {
                    "ok"
                };
                (status, text.chars().take(200).collect::<String>())
            }
            Err(e) => ("rejected", e.to_string()),
        };

        let (server, tool) = call::call_target(name, &args);
        self.state.activity.record(
            "tool_call",
            source,
            server,
            tool.or_else(|| Some(name.to_string())),
            status,
            args,
            excerpt,
        );

        result
    }

    /// Definitions for tools/list on the MCP endpoint
    pub fn definitions(&self) -> Vec<Value> {
        vec![
            json!({
                "name": RETRIEVE_TOOLS,
                "description": "Search the indexed tools of all connected upstream servers. Returns the best-matching tools with their schemas; call them via call_tool.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Keywords describing the needed capability"},
                        "limit": {"type": "integer", "description": "Maximum results (1-100)"},
                        "include_stats": {"type": "boolean", "description": "Attach per-tool usage counters"},
                        "debug": {"type": "boolean", "description": "Attach index diagnostics"},
                        "explain_tool": {"type": "string", "description": "Explain the ranking of one server:tool"}
                    },
                    "required": ["query"]
                }
            }),
            json!({
                "name": CALL_TOOL,
                "description": "Invoke an upstream tool by its server:tool name, or another proxy tool. Arguments are passed as a JSON string in args_json.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Tool identifier, e.g. github:create_issue"},
                        "args_json": {"type": "string", "description": "Tool arguments as a JSON object, serialized"},
                        "args": {"type": "object", "description": "Legacy inline arguments object"}
                    },
                    "required": ["name"]
                }
            }),
            json!({
                "name": READ_CACHE,
                "description": "Page through a truncated tool response using the cache key from the original call.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "offset": {"type": "integer", "minimum": 0},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 1000}
                    },
                    "required": ["key"]
                }
            }),
            json!({
                "name": UPSTREAM_SERVERS,
                "description": "Manage upstream MCP servers: list, add, remove, update, patch, tail_log. Newly added servers start quarantined.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string", "enum": ["list", "add", "remove", "update", "patch", "tail_log"]},
                        "name": {"type": "string"},
                        "command": {"type": "string"},
                        "args": {"type": "array", "items": {"type": "string"}},
                        "env": {"type": "object"},
                        "url": {"type": "string"},
                        "headers": {"type": "object"},
                        "protocol": {"type": "string"},
                        "enabled": {"type": "boolean"},
                        "lines": {"type": "integer"}
                    },
                    "required": ["operation"]
                }
            }),
            json!({
                "name": QUARANTINE_SECURITY,
                "description": "Inspect quarantined servers for tool poisoning before trusting them. Unquarantining is only possible out-of-band.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string", "enum": ["list_quarantined", "inspect_quarantined", "quarantine"]},
                        "name": {"type": "string"}
                    },
                    "required": ["operation"]
                }
            }),
            json!({
                "name": CODE_EXECUTION,
                "description": "Run a JavaScript snippet that can orchestrate upstream tools via callTool(server, tool, args). The snippet sees its input object as `input`.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "code": {"type": "string"},
                        "input": {"type": "object"},
                        "timeout_ms": {"type": "integer", "minimum": 1, "maximum": 600000},
                        "max_tool_calls": {"type": "integer", "minimum": 0},
                        "allowed_servers": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["code"]
                }
            }),
        ]
    }
}

/// A structured error payload for domain failures that should reach the LLM
/// as data rather than as protocol errors
pub fn error_envelope(
    message: impl Into<String>,
    troubleshooting: impl Into<String>,
    http_status: Option<u16>,
    body_excerpt: Option<String>,
) -> Value {
    let mut error = json!({
        "message": message.into(),
        "troubleshooting": troubleshooting.into(),
    });
    if let Some(status) = http_status {
        error["httpStatus"] = json!(status);
    }
    if let Some(excerpt) = body_excerpt {
        error["bodyExcerpt"] = json!(excerpt);
    }
    json!({ "error": error })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_tool_names_are_case_sensitive() {
        assert!(is_proxy_tool("retrieve_tools"));
        assert!(is_proxy_tool("code_execution"));
        assert!(!is_proxy_tool("Retrieve_Tools"));
        assert!(!is_proxy_tool("github:create_issue"));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let proxy = test_support::proxy(Default::default());
        let err = proxy
            .dispatch("bogus_tool", json!({}), crate::activity::ActivitySource::Mcp)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[test]
    fn test_definitions_cover_all_tools() {
        let proxy = test_support::proxy(Default::default());
        let names: Vec<String> = proxy
            .definitions()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        for name in [
            RETRIEVE_TOOLS,
            CALL_TOOL,
            READ_CACHE,
            UPSTREAM_SERVERS,
            QUARANTINE_SECURITY,
            CODE_EXECUTION,
        ] {
            assert!(names.contains(&name.to_string()), "missing {}", name);
        }
    }
}
