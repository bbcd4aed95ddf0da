//! The proxy's own MCP endpoint
//!
//! One JSON-RPC POST endpoint serving initialize, tools/list, and
//! tools/call over the virtual tool surface. Sessions are created on
//! `initialize` and correlated through the `Mcp-Session-Id` header.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::activity::ActivitySource;
use crate::listener::ConnectionSource;
use crate::proxy::{ProxyTools, ToolError};
use crate::session::SessionInfo;
use crate::state::AppState;
use mcpproxy_mcp::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Session header shared with the streamable HTTP transport convention
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Protocol revision this endpoint reports
const PROTOCOL_VERSION: &str = "2025-03-26";

pub async fn handle_mcp(
    State(state): State<Arc<AppState>>,
    Extension(source): Extension<ConnectionSource>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(request) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(-32600, "Invalid Request", Some(json!(e.to_string())));
            return Json(JsonRpcResponse::error(error, None)).into_response();
        }
    };

    let id = request.id.clone();
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if let Some(session) = &session_id {
        state.sessions.update_stats(session, 0);
    }

    match request.method.as_str() {
        "initialize" => {
            let (client_name, client_version) = client_info(&request);
            let session = SessionInfo::new(Uuid::new_v4().to_string(), client_name, client_version);
            let new_session_id = session.session_id.clone();
            state.sessions.set(session);

            let result = json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {"listChanged": false}
                },
                "serverInfo": {
                    "name": "mcpproxy",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            });

            let mut response = Json(JsonRpcResponse::success(result, id)).into_response();
            if let Ok(value) = HeaderValue::from_str(&new_session_id) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            response
        }

        "notifications/initialized" => axum::http::StatusCode::ACCEPTED.into_response(),

        "ping" => Json(JsonRpcResponse::success(json!({}), id)).into_response(),

        "tools/list" => {
            let proxy = ProxyTools::new(state.clone());
            let result = json!({ "tools": proxy.definitions() });
            Json(JsonRpcResponse::success(result, id)).into_response()
        }

        "tools/call" => {
            let params = request.params.unwrap_or_else(|| json!({}));
            let name = params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            if name.is_empty() {
                let error = JsonRpcError::invalid_params("tool name is required");
                return Json(JsonRpcResponse::error(error, id)).into_response();
            }

            let activity_source = match source {
                ConnectionSource::Tcp => ActivitySource::Mcp,
                ConnectionSource::Tray => ActivitySource::Tray,
            };

            let proxy = ProxyTools::new(state.clone());
            match proxy.dispatch(&name, arguments, activity_source).await {
                Ok(payload) => {
                    let is_error = payload.get("error").is_some();
                    let text = serde_json::to_string_pretty(&payload)
                        .unwrap_or_else(|_| payload.to_string());
                    let result = json!({
                        "content": [{"type": "text", "text": text}],
                        "isError": is_error,
                    });
                    Json(JsonRpcResponse::success(result, id)).into_response()
                }
                Err(e) => {
                    let error = match e {
                        ToolError::InvalidParams(message) => JsonRpcError::invalid_params(message),
                        ToolError::UnknownTool(tool) => JsonRpcError::method_not_found(&tool),
                        ToolError::Internal(message) => JsonRpcError::internal_error(message),
                    };
                    Json(JsonRpcResponse::error(error, id)).into_response()
                }
            }
        }

        other => {
            let error = JsonRpcError::method_not_found(other);
            Json(JsonRpcResponse::error(error, id)).into_response()
        }
    }
}

fn client_info(request: &JsonRpcRequest) -> (String, String) {
    let info = request
        .params
        .as_ref()
        .and_then(|params| params.get("clientInfo"));
    let name = info
        .and_then(|i| i.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let version = info
        .and_then(|i| i.get("version"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    (name, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_info_extraction() {
        let request = JsonRpcRequest::with_id(
            "initialize",
            Some(json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "claude", "version": "1.2"}
            })),
            "1",
        );
        assert_eq!(
            client_info(&request),
            ("claude".to_string(), "1.2".to_string())
        );

        let bare = JsonRpcRequest::with_id("initialize", Some(json!({})), "1");
        assert_eq!(client_info(&bare).0, "unknown");
    }
}
