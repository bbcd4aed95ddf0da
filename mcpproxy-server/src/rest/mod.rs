//! REST/SSE control plane
//!
//! The same router serves remote TCP clients and the local tray over IPC;
//! the per-listener source tag decides whether the API key applies.

pub mod handlers;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::listener::ConnectionSource;
use crate::mcp_endpoint;
use crate::state::AppState;

/// Paths reachable without an API key
const OPEN_PATHS: [&str; 3] = ["/healthz", "/ready", "/api/v1/info"];

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Success envelope: `{"success": true, "data": ...}`
pub fn ok_json<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Error envelope: `{"success": false, "error": ...}` with a status
pub fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// Build the shared router. The caller layers the per-listener
/// [`ConnectionSource`] extension before serving.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_endpoint::handle_mcp))
        .route("/healthz", get(handlers::healthz))
        .route("/ready", get(handlers::ready))
        .route("/events", get(handlers::events))
        .route("/api/v1/info", get(handlers::info))
        .route("/api/v1/servers", get(handlers::list_servers))
        .route("/api/v1/servers/{name}/tools", get(handlers::server_tools))
        .route("/api/v1/servers/{name}/logs", get(handlers::server_logs))
        .route("/api/v1/servers/{name}/enable", post(handlers::enable_server))
        .route(
            "/api/v1/servers/{name}/disable",
            post(handlers::disable_server),
        )
        .route(
            "/api/v1/servers/{name}/restart",
            post(handlers::restart_server),
        )
        .route("/api/v1/index/search", get(handlers::search_index))
        .route("/api/v1/activity", get(handlers::activity))
        .route("/api/v1/config", get(handlers::get_config))
        .route("/api/v1/config/apply", post(handlers::apply_config))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API-key enforcement. Local tray connections and the open paths are
/// exempt; everything else needs the configured key when one is set.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    Extension(source): Extension<ConnectionSource>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let exempt = source == ConnectionSource::Tray || OPEN_PATHS.contains(&path);

    if !exempt {
        let expected = state.config.security().api_key;
        if !expected.is_empty() {
            let provided = request
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if provided != expected {
                return error_json(StatusCode::UNAUTHORIZED, "invalid or missing API key");
            }
        }
    }

    next.run(request).await
}
