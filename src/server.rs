//! HTTP reporting and invocation surface.
//!
//! Four routes: `GET /` (identity), `GET /health` (evaluated metrics plus
//! cache stats), `GET /tools` (the registry), and `POST /invoke`. Responses
//! use a uniform envelope: `{"ok": true, "result": ...}` on success and
//! `{"ok": false, "error": {"kind", "message"}}` with the error's mapped
//! status code on failure.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::daemon::Daemon;
use crate::types::{Error, Result};

#[derive(Debug, Clone)]
struct AppState {
    daemon: Arc<Daemon>,
}

/// Build the application router.
pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/tools", get(tools))
        .route("/invoke", post(invoke))
        .with_state(AppState { daemon })
}

/// Serve the router until the shutdown future resolves.
pub async fn serve(
    daemon: Arc<Daemon>,
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "http_server_listening");
    axum::serve(listener, router(daemon))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "uptime_seconds": state.daemon.uptime().as_secs(),
        "tools_count": state.daemon.dispatcher().len(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let daemon = &state.daemon;
    Json(json!({
        "status": daemon.monitor().overall(),
        "uptime_seconds": daemon.uptime().as_secs(),
        "metrics": daemon.monitor().snapshot(),
        "cache": daemon.cache().stats(),
    }))
}

async fn tools(State(state): State<AppState>) -> std::result::Result<Json<Value>, ApiError> {
    let list = state.daemon.dispatcher().list();
    let mut tools = Vec::with_capacity(list.len());
    for tool in &list {
        let mut entry = serde_json::to_value(tool).map_err(Error::from)?;
        entry["signature"] = Value::String(tool.signature());
        tools.push(entry);
    }
    Ok(Json(json!({"count": tools.len(), "tools": tools})))
}

#[derive(Debug, Deserialize)]
struct InvokeRequest {
    tool: String,
    #[serde(default)]
    args: Value,
}

async fn invoke(
    State(state): State<AppState>,
    Json(request): Json<InvokeRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let result = state
        .daemon
        .dispatcher()
        .invoke(&request.tool, request.args)
        .await?;
    Ok(Json(json!({"ok": true, "result": result})))
}

/// Adapter from the crate error to the HTTP envelope.
#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "ok": false,
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            },
        }));
        (status, body).into_response()
    }
}
