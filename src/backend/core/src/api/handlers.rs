//! Public endpoints and the current-user endpoint.
//!
//! All handlers return `Result<impl IntoResponse, GatewayError>` so that
//! errors are converted to status codes by `GatewayError`'s `IntoResponse`.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResponse, AppState};
use crate::error::{GatewayError, Result};
use crate::rbac::Principal;

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| GatewayError::not_found("endpoint", "/metrics"))?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// OAuth Login
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
pub struct LoginResponse {
    pub url: String,
}

pub async fn login(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let url = state.directory.signin_url(&state.redirect_url)?;
    Ok(Json(ApiResponse::success(LoginResponse { url })))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
}

pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse> {
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GatewayError::validation("Missing authorization code"))?;
    let oauth_state = params.state.unwrap_or_default();

    let token = state.directory.exchange_code(&code, &oauth_state).await?;
    info!("Authorization code exchanged for access token");

    Ok(Json(ApiResponse::success(TokenResponse {
        token: token.access_token,
        expires_in: token.expires_in,
    })))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Current User
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: String,
    pub tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub roles: Vec<String>,
}

pub async fn me(principal: Principal) -> impl IntoResponse {
    Json(ApiResponse::success(MeResponse {
        user_id: principal.user_id.to_string(),
        tenant: principal.owner.to_string(),
        email: principal.email,
        display_name: principal.display_name,
        roles: principal.roles.iter().map(ToString::to_string).collect(),
    }))
}
