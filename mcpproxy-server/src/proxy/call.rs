//! `call_tool`: dispatch to upstreams with quarantine enforcement and
//! truncation of oversized results

use serde::Deserialize;
use serde_json::{json, Value};

use super::{error_envelope, is_proxy_tool, ProxyTools, ToolError, ToolResult, CALL_TOOL};
use crate::activity::ActivitySource;
use mcpproxy_mcp::{parse_tool_id, McpError, ToolsCallResult};

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    /// Preferred: arguments as a serialized JSON object
    #[serde(default)]
    args_json: Option<String>,
    /// Legacy inline arguments
    #[serde(default)]
    args: Option<Value>,
}

/// Extract (server, tool) for activity attribution without running the call
pub fn call_target(tool_name: &str, args: &Value) -> (Option<String>, Option<String>) {
    if tool_name != CALL_TOOL {
        return (None, None);
    }
    let Some(target) = args.get("name").and_then(Value::as_str) else {
        return (None, None);
    };
    match parse_tool_id(target) {
        Some((server, tool)) => (Some(server.to_string()), Some(tool.to_string())),
        None => (None, Some(target.to_string())),
    }
}

pub async fn call_tool(proxy: &ProxyTools, args: &Value, source: ActivitySource) -> ToolResult {
    let params: CallParams = serde_json::from_value(args.clone())
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    // call_tool may dispatch to sibling proxy tools, but never to itself
    if params.name == CALL_TOOL {
        return Err(ToolError::InvalidParams(
            "call_tool cannot call itself".to_string(),
        ));
    }

    let arguments = parse_arguments(&params)?;

    if is_proxy_tool(&params.name) {
        return Box::pin(proxy.dispatch(&params.name, arguments, source)).await;
    }

    let Some((server, tool)) = parse_tool_id(&params.name) else {
        return Err(ToolError::InvalidParams(format!(
            "'{}' is neither a proxy tool nor a \"server:tool\" identifier",
            params.name
        )));
    };

    let state = proxy.state();

    // Quarantine wins before any upstream traffic. The stored metadata is
    // returned so an LLM can inspect the tool without executing it.
    if state.is_quarantined(server) {
        let stored = state.index.get_tool(server, tool);
        return Ok(json!({
            "status": "QUARANTINED_SERVER_BLOCKED",
            "serverName": server,
            "tool": tool,
            "message": format!(
                "Server '{}' is quarantined; its tools cannot be executed until an operator reviews and unquarantines it.",
                server
            ),
            "toolDescription": stored.as_ref().map(|m| m.description.clone()),
            "inputSchema": stored.as_ref().map(|m| m.schema_value()),
            "instructions": "Use quarantine_security with operation inspect_quarantined to review this server. Unquarantining is only possible from the tray or the configuration file.",
        }));
    }

    let Some(client) = state.manager.get_client(server) else {
        return Ok(error_envelope(
            format!("server '{}' is not configured", server),
            "Check the server name against upstream_servers list.",
            None,
            None,
        ));
    };

    if !client.is_connected() {
        return Ok(error_envelope(
            format!(
                "server '{}' is not connected (state: {})",
                server,
                client.state()
            ),
            McpError::NotConnected {
                state: client.state().to_string(),
            }
            .troubleshooting_hint(),
            None,
            None,
        ));
    }

    let args_json_text =
        serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string());

    match state.manager.call_tool(&params.name, Some(arguments)).await {
        Ok(result) => {
            state.stats.record_call(&params.name);
            Ok(render_result(proxy, &params.name, &args_json_text, result))
        }
        Err(e) => Ok(upstream_error_envelope(e)),
    }
}

fn parse_arguments(params: &CallParams) -> Result<Value, ToolError> {
    if let Some(raw) = &params.args_json {
        if raw.trim().is_empty() {
            return Ok(json!({}));
        }
        return serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidParams(format!("args_json is not valid JSON: {}", e))
        });
    }
    Ok(params.args.clone().unwrap_or_else(|| json!({})))
}

/// Serialize the upstream result, truncating and caching when oversized
fn render_result(
    proxy: &ProxyTools,
    qualified: &str,
    args_json: &str,
    result: ToolsCallResult,
) -> Value {
    let state = proxy.state();
    let response_text = serialize_result(&result);

    match state.truncator.truncate(qualified, args_json, &response_text) {
        Some(truncated) => {
            let body: Value = serde_json::from_str(&response_text)
                .unwrap_or_else(|_| Value::String(response_text.clone()));
            state.cache.store(
                truncated.cache_key.clone(),
                qualified,
                args_json,
                body,
                truncated.record_path.clone(),
                truncated.total_records,
            );

            json!({
                "truncated": true,
                "preview": truncated.preview,
                "cacheKey": truncated.cache_key,
                "totalRecords": truncated.total_records,
                "hint": format!(
                    "The full response is cached. Call read_cache with {{\"key\": \"{}\", \"offset\": 0, \"limit\": 50}} to page through it.",
                    truncated.cache_key
                ),
                "isError": result.is_error,
            })
        }
        None => {
            let body: Value = serde_json::from_str(&response_text)
                .unwrap_or(Value::String(response_text));
            json!({
                "result": body,
                "isError": result.is_error,
            })
        }
    }
}

/// Prefer structured content, then plain text, then the raw content array
fn serialize_result(result: &ToolsCallResult) -> String {
    if let Some(structured) = &result.structured_content {
        return structured.to_string();
    }

    let text = result.text();
    if !text.is_empty() {
        return text;
    }

    serde_json::to_string(&result.content).unwrap_or_default()
}

fn upstream_error_envelope(error: McpError) -> Value {
    let hint = error.troubleshooting_hint().to_string();
    match error {
        McpError::Transport {
            message,
            http_status,
            body_excerpt,
            ..
        } => error_envelope(message, hint, http_status, body_excerpt),
        other => error_envelope(other.to_string(), hint, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::test_support;
    use mcpproxy_config::{ProxyConfig, UpstreamConfig};
    use mcpproxy_index::ToolMetadata;

    fn quarantined_proxy() -> ProxyTools {
        let mut config = ProxyConfig::default();
        config.mcp_servers.insert(
            "q1".to_string(),
            UpstreamConfig {
                url: Some("http://127.0.0.1:9/mcp".to_string()),
                quarantined: true,
                ..Default::default()
            },
        );

        let proxy = test_support::proxy(config);
        proxy.state().index.index_tool(ToolMetadata::new(
            "q1",
            "echo",
            "Echo a message back",
            r#"{"type":"object","properties":{"msg":{"type":"string"}}}"#,
            "h",
        ));
        proxy
    }

    #[tokio::test]
    async fn test_quarantined_call_blocked_with_metadata() {
        let proxy = quarantined_proxy();
        let payload = proxy
            .dispatch(
                "call_tool",
                json!({"name": "q1:echo", "args_json": "{\"msg\":\"hi\"}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();

        assert_eq!(payload["status"], json!("QUARANTINED_SERVER_BLOCKED"));
        assert_eq!(payload["serverName"], json!("q1"));
        assert_eq!(payload["toolDescription"], json!("Echo a message back"));
        assert!(payload["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_self_call_rejected() {
        let proxy = test_support::proxy(Default::default());
        let err = proxy
            .dispatch(
                "call_tool",
                json!({"name": "call_tool", "args_json": "{}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_recursive_dispatch_to_sibling_tool() {
        let proxy = test_support::proxy(Default::default());
        proxy.state().index.index_tool(ToolMetadata::new(
            "srv",
            "thing",
            "A thing",
            "{}",
            "h",
        ));

        let payload = proxy
            .dispatch(
                "call_tool",
                json!({"name": "retrieve_tools", "args_json": "{\"query\":\"thing\"}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();
        assert!(payload["tools"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_server_reported() {
        let proxy = test_support::proxy(Default::default());
        let payload = proxy
            .dispatch(
                "call_tool",
                json!({"name": "ghost:tool", "args_json": "{}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();
        assert!(payload["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not configured"));
    }

    #[tokio::test]
    async fn test_not_connected_includes_state_name() {
        let proxy = test_support::proxy(Default::default());
        proxy
            .state()
            .manager
            .add_config(
                "idle-one",
                UpstreamConfig {
                    command: Some("cat".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let payload = proxy
            .dispatch(
                "call_tool",
                json!({"name": "idle-one:echo", "args_json": "{}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap();
        assert!(payload["error"]["message"]
            .as_str()
            .unwrap()
            .contains("state: idle"));
    }

    #[tokio::test]
    async fn test_malformed_identifier_rejected() {
        let proxy = test_support::proxy(Default::default());
        let err = proxy
            .dispatch(
                "call_tool",
                json!({"name": "not-a-tool-id", "args_json": "{}"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_bad_args_json_rejected() {
        let proxy = test_support::proxy(Default::default());
        let err = proxy
            .dispatch(
                "call_tool",
                json!({"name": "a:b", "args_json": "{not json"}),
                ActivitySource::Mcp,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn test_call_target_extraction() {
        let (server, tool) = call_target("call_tool", &json!({"name": "gh:issues"}));
        assert_eq!(server.as_deref(), Some("gh"));
        assert_eq!(tool.as_deref(), Some("issues"));

        let (server, tool) = call_target("retrieve_tools", &json!({}));
        assert!(server.is_none() && tool.is_none());
    }
}
