//! Shared HTTP server for the SSE and http-stream transports.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::engine::Engine;
use super::sse::SessionTable;
use super::{admin, http_stream, sse};
use crate::config::TransportKind;
use crate::{AppError, Result};

/// State shared by every HTTP handler.
#[derive(Debug, Clone)]
pub struct HttpState {
    /// Protocol engine.
    pub engine: Engine,
    /// Open SSE sessions.
    pub sse_sessions: Arc<SessionTable>,
    /// Server-wide shutdown token; cancelling it ends every session.
    pub shutdown: CancellationToken,
}

impl HttpState {
    /// State with no open sessions.
    #[must_use]
    pub fn new(engine: Engine, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            sse_sessions: Arc::new(SessionTable::new()),
            shutdown,
        }
    }
}

/// `GET /health`
async fn health(axum::extract::State(state): axum::extract::State<HttpState>) -> Json<Value> {
    let snapshot = state.engine.config().snapshot();
    Json(json!({
        "status": "ok",
        "name": snapshot.config.server.name,
        "version": snapshot.config.server.version,
        "transport": snapshot.config.transport.kind.as_str(),
        "generation": snapshot.generation,
        "sse_sessions": state.sse_sessions.len(),
    }))
}

/// Routes for `kind`: the transport endpoints plus health and admin.
///
/// Stdio has no HTTP endpoints of its own; its router carries only health
/// and admin.
#[must_use]
pub fn router(state: HttpState, kind: TransportKind) -> Router {
    let transport = match kind {
        TransportKind::Sse => Router::new()
            .route("/sse", get(sse::connect))
            .route("/message", post(sse::post_message)),
        TransportKind::HttpStream => Router::new().route("/mcp", post(http_stream::stream)),
        TransportKind::Stdio => Router::new(),
    };

    transport
        .route("/health", get(health))
        .merge(admin::router(state.clone()))
        .with_state(state)
}

/// Bind `transport.host:transport.port` and serve until `shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Transport` if the address cannot be bound or the
/// listener fails.
pub async fn serve_http(state: HttpState) -> Result<()> {
    let config = state.engine.config().current();
    let kind = config.transport.kind;
    let host = config.transport.host.as_str();
    let port = config.transport.port;

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind {host}:{port}: {err}")))?;
    let bound = listener.local_addr()?;

    info!(%bound, transport = kind.as_str(), "starting HTTP MCP transport");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state, kind))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("HTTP server error: {err}")))?;

    info!("HTTP MCP transport shut down");
    Ok(())
}
