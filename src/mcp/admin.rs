//! Authenticated administration endpoints.
//!
//! Every route requires `Authorization: Bearer <server.admin_token>`. With
//! no token configured the routes behave as if they did not exist.

use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::http::HttpState;
use crate::config_manager::ReloadStatus;
use crate::AppError;

/// Admin error rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub struct AdminError(AppError);

impl From<AppError> for AdminError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AppError::NotFound(_) | AppError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type AdminResult = std::result::Result<Json<Value>, AdminError>;

/// Admin routes behind bearer authentication.
pub fn router(state: HttpState) -> axum::Router<HttpState> {
    Router::new()
        .route("/admin/reload", post(reload))
        .route("/admin/config", get(config))
        .route("/admin/tools", get(tools))
        .route("/admin/tools/{name}/{action}", post(toggle_tool))
        .route("/admin/categories/{category}/{action}", post(toggle_category))
        .route_layer(middleware::from_fn_with_state(state, require_token))
}

async fn require_token(State(state): State<HttpState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.engine.config().current().server.admin_token.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented != Some(expected.as_str()) {
        warn!(path = %request.uri().path(), "admin request rejected");
        return AdminError(AppError::Unauthorized("invalid admin token".into())).into_response();
    }
    next.run(request).await
}

fn parse_action(action: &str) -> Result<bool, AdminError> {
    match action {
        "enable" => Ok(true),
        "disable" => Ok(false),
        other => Err(AppError::InvalidParams(format!("unknown action '{other}'")).into()),
    }
}

fn reload_status(status: &ReloadStatus) -> Value {
    match status {
        ReloadStatus::Never => json!({ "status": "never" }),
        ReloadStatus::Applied(generation) => json!({ "status": "applied", "generation": generation }),
        ReloadStatus::Rejected(reason) => json!({ "status": "rejected", "error": reason }),
    }
}

/// `POST /admin/reload`
async fn reload(State(state): State<HttpState>) -> AdminResult {
    let snapshot = state.engine.config().reload().await?;
    info!(generation = snapshot.generation, "config reloaded via admin endpoint");
    Ok(Json(json!({
        "generation": snapshot.generation,
        "loaded_at": snapshot.loaded_at.to_rfc3339(),
    })))
}

/// `GET /admin/config`
async fn config(State(state): State<HttpState>) -> AdminResult {
    let manager = state.engine.config();
    let snapshot = manager.snapshot();
    Ok(Json(json!({
        "generation": snapshot.generation,
        "loaded_at": snapshot.loaded_at.to_rfc3339(),
        "last_reload": reload_status(&manager.last_reload()),
        "config": snapshot.config.redacted(),
    })))
}

/// `GET /admin/tools`
async fn tools(State(state): State<HttpState>) -> AdminResult {
    let statuses = state.engine.registry().statuses().await;
    Ok(Json(json!({ "tools": statuses })))
}

/// `POST /admin/tools/{name}/{action}`
async fn toggle_tool(
    State(state): State<HttpState>,
    Path((name, action)): Path<(String, String)>,
) -> AdminResult {
    let enabled = parse_action(&action)?;
    state.engine.registry().set_tool_enabled(&name, enabled).await?;
    info!(tool = %name, enabled, "tool toggled via admin endpoint");
    Ok(Json(json!({ "tool": name, "enabled": enabled })))
}

/// `POST /admin/categories/{category}/{action}`
async fn toggle_category(
    State(state): State<HttpState>,
    Path((category, action)): Path<(String, String)>,
) -> AdminResult {
    let enabled = parse_action(&action)?;
    let affected = state
        .engine
        .registry()
        .set_category_enabled(&category, enabled)
        .await;
    info!(%category, enabled, affected, "category toggled via admin endpoint");
    Ok(Json(json!({ "category": category, "enabled": enabled, "tools": affected })))
}
