//! `code_execution`: JavaScript orchestration over upstream tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{ProxyTools, ToolError, ToolResult};
use crate::state::ConfigStore;
use mcpproxy_js::{ExecuteOptions, ExecuteRequest, UpstreamCaller};
use mcpproxy_mcp::{tool_id, UpstreamManager};

#[derive(Debug, Deserialize)]
struct CodeExecParams {
    code: String,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_tool_calls: Option<u32>,
    #[serde(default)]
    allowed_servers: Option<Vec<String>>,
}

pub async fn code_execution(proxy: &ProxyTools, args: &Value) -> ToolResult {
    let params: CodeExecParams = serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    if params.code.trim().is_empty() {
        return Err(ToolError::InvalidParams(
            "code must be a non-empty string".to_string(),
        ));
    }

    let defaults = proxy.state().sandbox.config().clone();
    let options = ExecuteOptions {
        timeout: params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.default_timeout),
        max_tool_calls: params
            .max_tool_calls
            .unwrap_or(defaults.default_max_tool_calls),
        allowed_servers: params.allowed_servers,
    };

    let result = proxy
        .state()
        .sandbox
        .execute(ExecuteRequest {
            code: params.code,
            input: params.input.unwrap_or_else(|| json!({})),
            options,
        })
        .await;

    serde_json::to_value(&result).map_err(|e| ToolError::Internal(e.to_string()))
}

/// Bridges sandbox tool calls into the upstream manager, with the same
/// quarantine policy as `call_tool`: scripts cannot reach blocked servers.
pub struct ManagerCaller {
    manager: Arc<UpstreamManager>,
    config: Arc<ConfigStore>,
}

impl ManagerCaller {
    pub fn new(manager: Arc<UpstreamManager>, config: Arc<ConfigStore>) -> Self {
        Self { manager, config }
    }

    fn is_quarantined(&self, server: &str) -> bool {
        if let Some(client) = self.manager.get_client(server) {
            return client.config().quarantined;
        }
        self.config
            .upstream(server)
            .map(|u| u.quarantined)
            .unwrap_or(false)
    }
}

#[async_trait]
impl UpstreamCaller for ManagerCaller {
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<Value, String> {
        if self.is_quarantined(server) {
            return Err(format!("server '{}' is quarantined", server));
        }

        let qualified = tool_id(server, tool);
        let result = self
            .manager
            .call_tool(&qualified, Some(args))
            .await
            .map_err(|e| e.to_string())?;

        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        let text = result.text();
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
