//! Per-upstream connection state machine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{McpError, McpResult};
use crate::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest, ServerInfo,
    Tool, ToolsCallParams, ToolsCallResult, ToolsListResult,
};
use crate::stderr::StderrRing;
use crate::transport::{select_transport, UpstreamTransport};
use mcpproxy_config::UpstreamConfig;

/// Transitions retained for diagnostics
const TRANSITION_HISTORY: usize = 50;

/// Connection lifecycle of one upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected, nothing in flight
    Idle,
    /// Transport establishment or initialize handshake in progress
    Connecting,
    /// Waiting on an OAuth flow before the handshake can complete
    AuthPending,
    /// Initialized and able to serve calls
    Ready,
    /// Last attempt failed; the reconnector will retry
    Error,
    /// Teardown in progress
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AuthPending => "auth_pending",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// One observed state change
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Hook into the OAuth coordinator, injected so this crate stays free of a
/// dependency cycle and tests can substitute a recording stub.
#[async_trait]
pub trait OAuthBroker: Send + Sync {
    /// A 401 with optional RFC 9728 metadata was observed for `server`
    async fn on_auth_required(&self, server: &str, resource_metadata: Option<&str>);

    /// Whether a flow is currently running for `server`
    fn is_flow_active(&self, server: &str) -> bool;
}

/// One upstream MCP server: a transport plus its lifecycle state.
///
/// All requests go through the transport mutex, so per-upstream operations
/// are totally ordered.
pub struct UpstreamClient {
    name: String,
    config: RwLock<UpstreamConfig>,
    transport: tokio::sync::Mutex<Option<Box<dyn UpstreamTransport>>>,
    state: RwLock<ConnectionState>,
    history: Mutex<VecDeque<StateTransition>>,
    stderr: Arc<StderrRing>,
    server_info: RwLock<Option<ServerInfo>>,
    oauth: Option<Arc<dyn OAuthBroker>>,
    next_request_id: AtomicU64,
}

impl UpstreamClient {
    pub fn new(
        name: impl Into<String>,
        config: UpstreamConfig,
        oauth: Option<Arc<dyn OAuthBroker>>,
    ) -> Self {
        Self {
            name: name.into(),
            config: RwLock::new(config),
            transport: tokio::sync::Mutex::new(None),
            state: RwLock::new(ConnectionState::Idle),
            history: Mutex::new(VecDeque::with_capacity(TRANSITION_HISTORY)),
            stderr: Arc::new(StderrRing::default()),
            server_info: RwLock::new(None),
            oauth,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> UpstreamConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; the caller decides whether to reconnect
    pub fn update_config(&self, config: UpstreamConfig) {
        *self.config.write() = config;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::AuthPending
        )
    }

    /// Recent state transitions, oldest first
    pub fn transitions(&self) -> Vec<StateTransition> {
        self.history.lock().iter().cloned().collect()
    }

    /// Server info captured from the initialize handshake
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    /// The stderr ring shared with the stdio transport
    pub fn stderr(&self) -> Arc<StderrRing> {
        self.stderr.clone()
    }

    fn set_state(&self, to: ConnectionState, reason: impl Into<String>) {
        let reason = reason.into();
        let from = {
            let mut state = self.state.write();
            let from = *state;
            *state = to;
            from
        };

        if from != to {
            tracing::info!(
                server = %self.name,
                from = %from,
                to = %to,
                reason = %reason,
                "upstream state change"
            );
        }

        let mut history = self.history.lock();
        if history.len() == TRANSITION_HISTORY {
            history.pop_front();
        }
        history.push_back(StateTransition {
            from,
            to,
            reason,
            at: Utc::now(),
        });
    }

    fn next_id(&self) -> Value {
        Value::from(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Connect and run the initialize handshake. Idempotent: a client that
    /// is already Ready or mid-handshake returns immediately.
    pub async fn connect(&self) -> McpResult<()> {
        match self.state() {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                return Err(McpError::NotConnected {
                    state: self.state().to_string(),
                })
            }
            _ => {}
        }

        self.set_state(ConnectionState::Connecting, "connect requested");

        let config = self.config();
        let mut transport = match select_transport(&config, self.stderr.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(ConnectionState::Error, e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = transport.connect().await {
            return Err(self.fail_connect(e).await);
        }

        match self.initialize(transport.as_mut()).await {
            Ok(info) => {
                *self.server_info.write() = Some(info);
                *self.transport.lock().await = Some(transport);
                self.set_state(ConnectionState::Ready, "initialize succeeded");
                Ok(())
            }
            Err(e) => {
                let _ = transport.close().await;
                Err(self.fail_connect(e).await)
            }
        }
    }

    async fn fail_connect(&self, error: McpError) -> McpError {
        if let McpError::AuthRequired { resource_metadata } = &error {
            self.set_state(ConnectionState::AuthPending, "401 observed");
            if let Some(broker) = &self.oauth {
                broker
                    .on_auth_required(&self.name, resource_metadata.as_deref())
                    .await;
            }
        } else {
            self.set_state(ConnectionState::Error, error.to_string());
        }
        error
    }

    async fn initialize(&self, transport: &mut dyn UpstreamTransport) -> McpResult<ServerInfo> {
        let params = InitializeParams {
            protocol_version: crate::MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "mcpproxy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let request = JsonRpcRequest::new(
            "initialize",
            Some(serde_json::to_value(&params)?),
            Some(self.next_id()),
        );

        let response = transport.request(request).await?;
        if let Some(error) = response.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        let result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::transport("initialize returned no result"))?,
        )?;

        transport
            .notify(JsonRpcRequest::notification(
                "notifications/initialized",
                Some(json!({})),
            ))
            .await?;

        Ok(result.server_info)
    }

    /// Tear down the transport. Any state goes back to Idle.
    pub async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnecting, "disconnect requested");

        if let Some(mut transport) = self.transport.lock().await.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(server = %self.name, "error closing transport: {}", e);
            }
        }
        *self.server_info.write() = None;

        self.set_state(ConnectionState::Idle, "disconnected");
    }

    /// Snapshot of the upstream's tools
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let response = self.roundtrip("tools/list", Some(json!({}))).await?;
        let result: ToolsListResult = serde_json::from_value(response)?;
        Ok(result.tools)
    }

    /// Invoke one tool on the upstream
    pub async fn call_tool(&self, tool: &str, arguments: Option<Value>) -> McpResult<ToolsCallResult> {
        let params = ToolsCallParams {
            name: tool.to_string(),
            arguments,
        };
        let response = self
            .roundtrip("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        let result: ToolsCallResult = serde_json::from_value(response)?;
        Ok(result)
    }

    async fn roundtrip(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        if self.state() != ConnectionState::Ready {
            return Err(McpError::NotConnected {
                state: self.state().to_string(),
            });
        }

        let request = JsonRpcRequest::new(method, params, Some(self.next_id()));

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or_else(|| McpError::NotConnected {
            state: self.state().to_string(),
        })?;

        match transport.request(request).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    // A JSON-RPC error is an application-level answer, not a
                    // connection failure.
                    return Err(McpError::Protocol {
                        code: error.code,
                        message: error.message,
                    });
                }
                response
                    .result
                    .ok_or_else(|| McpError::transport("response had neither result nor error"))
            }
            Err(e) => {
                match &e {
                    McpError::ConnectionFailed { .. } | McpError::Transport { .. } => {
                        self.set_state(ConnectionState::Error, e.to_string());
                        *guard = None;
                    }
                    McpError::AuthRequired { .. } => {
                        drop(guard);
                        return Err(self.fail_connect(e).await);
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fake_server_script() -> tempfile::NamedTempFile {
        // A minimal line-delimited MCP server: answers initialize,
        // tools/list, and tools/call with canned payloads.
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let script = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{"listChanged":false}},"serverInfo":{"name":"fake","version":"0.1.0"}}}' ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo a message back","inputSchema":{"type":"object","properties":{"msg":{"type":"string"}}}}]}}' ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hi"}],"isError":false}}' ;;
  esac
done
"#;
        file.write_all(script.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn stdio_client(script_path: &str) -> UpstreamClient {
        let config = UpstreamConfig {
            command: Some("sh".to_string()),
            args: vec![script_path.to_string()],
            ..Default::default()
        };
        UpstreamClient::new("fake", config, None)
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(ConnectionState::AuthPending.to_string(), "auth_pending");
        assert_eq!(ConnectionState::Ready.to_string(), "ready");
    }

    #[tokio::test]
    async fn test_call_tool_when_idle_reports_state() {
        let client = stdio_client("/nonexistent.sh");
        let err = client.call_tool("echo", None).await.unwrap_err();
        assert_eq!(
            err,
            McpError::NotConnected {
                state: "idle".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_connect_failure_transitions_to_error() {
        let config = UpstreamConfig {
            command: Some("/definitely/not/a/binary".to_string()),
            ..Default::default()
        };
        let client = UpstreamClient::new("broken", config, None);

        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::Error);

        let transitions = client.transitions();
        assert!(transitions
            .iter()
            .any(|t| t.to == ConnectionState::Connecting));
        assert!(transitions.iter().any(|t| t.to == ConnectionState::Error));
    }

    #[tokio::test]
    async fn test_full_handshake_and_call() {
        let script = fake_server_script();
        let client = stdio_client(script.path().to_str().unwrap());

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(client.server_info().unwrap().name, "fake");

        // Idempotent
        client.connect().await.unwrap();

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = client
            .call_tool("echo", Some(serde_json::json!({"msg": "hi"})))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "hi");

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Idle);
    }
}
