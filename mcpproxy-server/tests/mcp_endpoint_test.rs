//! MCP endpoint integration tests: initialize, discovery, quarantine

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Extension;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use mcpproxy_cache::{ResponseCache, Truncator};
use mcpproxy_config::{ProxyConfig, SandboxConfig, UpstreamConfig};
use mcpproxy_index::{ToolIndex, ToolMetadata};
use mcpproxy_js::SandboxPool;
use mcpproxy_mcp::UpstreamManager;
use mcpproxy_oauth::FlowCoordinator;
use mcpproxy_server::activity::ActivityLog;
use mcpproxy_server::listener::ConnectionSource;
use mcpproxy_server::proxy::code_exec::ManagerCaller;
use mcpproxy_server::rest;
use mcpproxy_server::state::{AppState, ConfigStore};

fn quarantined_setup() -> (axum::Router, Arc<AppState>) {
    let mut config = ProxyConfig::default();
    config.mcp_servers.insert(
        "q1".to_string(),
        UpstreamConfig {
            url: Some("http://127.0.0.1:9/mcp".to_string()),
            quarantined: true,
            ..Default::default()
        },
    );

    let store = Arc::new(ConfigStore::new(config, None));
    let manager = UpstreamManager::new(None);
    let caller = Arc::new(ManagerCaller::new(manager.clone(), store.clone()));
    let state = AppState::new(
        store,
        manager,
        Arc::new(ToolIndex::new()),
        Arc::new(ResponseCache::new(16, Duration::from_secs(60))),
        Truncator::new(100, 3),
        Arc::new(SandboxPool::new(SandboxConfig::default(), caller)),
        ActivityLog::new(None),
        FlowCoordinator::new(),
    );
    state.index.index_tool(ToolMetadata::new(
        "q1",
        "echo",
        "Echo a message back",
        r#"{"type":"object","properties":{"msg":{"type":"string"}}}"#,
        "h",
    ));

    let router = rest::router(state.clone()).layer(Extension(ConnectionSource::Tcp));
    (router, state)
}

async fn rpc(router: &axum::Router, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri("/mcp")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_initialize_creates_session() {
    let (router, state) = quarantined_setup();

    let (status, body) = rpc(
        &router,
        json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1"}
            },
            "id": 1
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], json!("mcpproxy"));
    assert_eq!(state.sessions.count(), 1);
    assert_eq!(state.sessions.list()[0].client_name, "test-client");
}

#[tokio::test]
async fn test_tools_list_exposes_virtual_tools() {
    let (router, _state) = quarantined_setup();

    let (_, body) = rpc(
        &router,
        json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
    )
    .await;

    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    for expected in [
        "retrieve_tools",
        "call_tool",
        "read_cache",
        "upstream_servers",
        "quarantine_security",
        "code_execution",
    ] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn test_quarantined_call_blocked_end_to_end() {
    let (router, _state) = quarantined_setup();

    let (_, body) = rpc(
        &router,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": "call_tool",
                "arguments": {"name": "q1:echo", "args_json": "{\"msg\":\"hi\"}"}
            },
            "id": 3
        }),
    )
    .await;

    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("QUARANTINED_SERVER_BLOCKED"));
    assert!(text.contains("\"serverName\": \"q1\""));
}

#[tokio::test]
async fn test_retrieve_tools_hides_quarantined_end_to_end() {
    let (router, _state) = quarantined_setup();

    let (_, body) = rpc(
        &router,
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "retrieve_tools", "arguments": {"query": "echo"}},
            "id": 4
        }),
    )
    .await;

    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let payload: Value = serde_json::from_str(text).unwrap();
    assert_eq!(payload["tools"], json!([]));
}

#[tokio::test]
async fn test_unknown_method_is_rpc_error() {
    let (router, _state) = quarantined_setup();

    let (_, body) = rpc(
        &router,
        json!({"jsonrpc": "2.0", "method": "resources/list", "id": 5}),
    )
    .await;
    assert_eq!(body["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn test_ping() {
    let (router, _state) = quarantined_setup();
    let (_, body) = rpc(&router, json!({"jsonrpc": "2.0", "method": "ping", "id": 6})).await;
    assert_eq!(body["result"], json!({}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncation_round_trip_through_cache() {
    let (_, state) = quarantined_setup();

    // Store an oversized array the way call_tool would
    let records: Vec<Value> = (0..5000).map(|i| json!({"id": i})).collect();
    let body_text = serde_json::to_string(&records).unwrap();
    let truncated = state
        .truncator
        .truncate("big:list", "{}", &body_text)
        .expect("must truncate");
    assert!(!truncated.cache_key.is_empty());
    assert_eq!(truncated.total_records, 5000);

    state.cache.store(
        truncated.cache_key.clone(),
        "big:list",
        "{}",
        serde_json::from_str(&body_text).unwrap(),
        truncated.record_path.clone(),
        truncated.total_records,
    );

    let page = state
        .cache
        .get_records(&truncated.cache_key, 0, 50)
        .unwrap();
    assert_eq!(page.records.len(), 50);
    assert_eq!(page.records[0]["id"], json!(0));

    // Out-of-bounds limit is rejected
    assert!(state
        .cache
        .get_records(&truncated.cache_key, 0, 1500)
        .is_err());
}
