//! REST handler implementations

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

use super::{error_json, ok_json};
use crate::activity::ActivityFilter;
use crate::state::AppState;
use mcpproxy_config::ProxyConfig;

pub async fn healthz() -> impl IntoResponse {
    ok_json(json!({"status": "ok"}))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    // Serving requests at all means the listeners are up; readiness only
    // degrades while shutdown is in progress, which closes the listeners.
    let _ = &state;
    ok_json(json!({"status": "ready"})).into_response()
}

pub async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let listen_addr = state.listen_addr.read().clone();
    let mut endpoints = json!({
        "http": format!("http://{}/mcp", listen_addr),
    });
    if let Some(ipc) = &state.ipc_path {
        endpoints["ipc"] = json!(format!("unix://{}", ipc));
    }

    ok_json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "listen_addr": listen_addr,
        "web_ui_url": format!("http://{}/", listen_addr),
        "endpoints": endpoints,
    }))
}

pub async fn list_servers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let statuses = state.manager.list_all();
    let known: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();

    let mut servers: Vec<Value> = statuses
        .iter()
        .map(|status| serde_json::to_value(status).unwrap_or_default())
        .collect();

    for (name, upstream) in state.config.get().mcp_servers {
        if !known.contains(&name.as_str()) {
            servers.push(json!({
                "name": name,
                "protocol": upstream.protocol.as_str(),
                "enabled": upstream.enabled,
                "quarantined": upstream.quarantined,
                "connected": false,
                "state": "idle",
                "tool_count": 0,
            }));
        }
    }

    ok_json(servers)
}

pub async fn server_tools(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if state.config.upstream(&name).is_none() && state.manager.get_client(&name).is_none() {
        return error_json(
            StatusCode::NOT_FOUND,
            format!("server '{}' not found", name),
        );
    }

    let tools: Vec<Value> = state
        .index
        .server_tools(&name)
        .iter()
        .map(|meta| {
            json!({
                "name": meta.tool_name,
                "description": meta.description,
                "inputSchema": meta.schema_value(),
                "hash": meta.hash,
            })
        })
        .collect();

    ok_json(json!({ "server": name, "tools": tools })).into_response()
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    tail: usize,
}

fn default_tail() -> usize {
    100
}

pub async fn server_logs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    match state.manager.stderr_tail(&name, query.tail.min(500)) {
        Ok(lines) => ok_json(json!({ "server": name, "lines": lines })).into_response(),
        Err(e) => error_json(StatusCode::NOT_FOUND, e.to_string()),
    }
}

pub async fn enable_server(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    set_enabled(state, name, true).await
}

pub async fn disable_server(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    set_enabled(state, name, false).await
}

async fn set_enabled(state: Arc<AppState>, name: String, enabled: bool) -> Response {
    let Some(mut upstream) = state.config.upstream(&name) else {
        return error_json(
            StatusCode::NOT_FOUND,
            format!("server '{}' not found", name),
        );
    };

    upstream.enabled = enabled;
    state.config.set_upstream(&name, upstream.clone());

    let result = if state.manager.get_client(&name).is_some() {
        state.manager.update_server(&name, upstream).await
    } else {
        state.manager.add_config(&name, upstream).map(|_| ())
    };

    match result {
        Ok(()) => ok_json(json!({
            "action": if enabled { "enable" } else { "disable" },
            "server": name,
            "enabled": enabled,
        }))
        .into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn restart_server(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.manager.restart_server(&name).await {
        Ok(()) => ok_json(json!({
            "action": "restart",
            "server": name,
        }))
        .into_response(),
        Err(e) => error_json(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn search_index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let Some(q) = query.q.filter(|q| !q.trim().is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "query parameter 'q' is required");
    };

    match state.index.search(&q, query.limit.unwrap_or(0)) {
        Ok(hits) => {
            let results: Vec<Value> = hits
                .into_iter()
                .filter(|hit| !state.is_quarantined(&hit.tool.server_name))
                .map(|hit| {
                    json!({
                        "name": hit.tool.id(),
                        "server": hit.tool.server_name,
                        "description": hit.tool.description,
                        "score": hit.score,
                    })
                })
                .collect();
            ok_json(json!({ "query": q, "results": results })).into_response()
        }
        Err(e) => error_json(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

pub async fn activity(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ActivityFilter>,
) -> impl IntoResponse {
    let records = state.activity.query(&filter);
    let total = records.len();
    ok_json(json!({ "records": records, "total": total }))
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut config = state.config.get();
    // The key never leaves the process
    config.security.api_key = String::new();
    ok_json(config)
}

pub async fn apply_config(
    State(state): State<Arc<AppState>>,
    Json(new_config): Json<ProxyConfig>,
) -> Response {
    if let Err(e) = new_config.validate_all() {
        return error_json(StatusCode::BAD_REQUEST, e.to_string());
    }

    let changed = state.config.replace(new_config);
    let upstream_changes: Vec<String> = changed
        .iter()
        .filter(|field| field.starts_with("mcpServers."))
        .cloned()
        .collect();

    if !upstream_changes.is_empty() {
        let state = state.clone();
        tokio::spawn(async move {
            reload_upstreams(state, upstream_changes).await;
        });
    }

    ok_json(json!({
        "applied_immediately": true,
        "changed_fields": changed,
    }))
    .into_response()
}

/// Apply changed upstream entries to the live manager: removed entries are
/// torn down, new and changed ones re-registered and reconnected.
async fn reload_upstreams(state: Arc<AppState>, changed: Vec<String>) {
    for field in changed {
        let Some(name) = field.strip_prefix("mcpServers.") else {
            continue;
        };

        match state.config.upstream(name) {
            Some(upstream) => {
                let result = if state.manager.get_client(name).is_some() {
                    state.manager.update_server(name, upstream).await
                } else {
                    state.manager.add_config(name, upstream).map(|_| ())
                };
                if let Err(e) = result {
                    tracing::warn!(server = %name, "config reload failed: {}", e);
                }
            }
            None => {
                if let Err(e) = state.manager.remove_server(name).await {
                    tracing::debug!(server = %name, "removed entry had no client: {}", e);
                }
                state.index.delete_server_tools(name);
            }
        }
    }

    state
        .events
        .publish_status(true, json!({"config_reloaded": true}));
}

pub async fn events(State(state): State<Arc<AppState>>) -> Response {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|message| async move {
        match message {
            Ok(value) => Event::default().json_data(&value).ok().map(Ok::<_, Infallible>),
            Err(_) => None,
        }
    });

    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
