//! Policy sync and status endpoints.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiResponse, AppState};
use crate::error::Result;
use crate::rbac::SyncReport;

/// `POST /api/rbac/sync`. A concurrent sync answers 409.
pub async fn sync_policy(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let report = state.sync.trigger().await?;
    Ok(Json(ApiResponse::success(report)))
}

#[derive(Debug, Serialize)]
pub struct PolicyStatus {
    pub domain: String,
    pub version: u64,
    pub grants: usize,
    pub assignments: usize,
    pub roles: usize,
    pub fingerprint: String,
    pub installed_at: DateTime<Utc>,
    pub sync_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<SyncReport>,
}

pub async fn policy_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.store().snapshot();
    Json(ApiResponse::success(PolicyStatus {
        domain: state.tenant().to_string(),
        version: snapshot.version(),
        grants: snapshot.grants().len(),
        assignments: snapshot.assignments().len(),
        roles: snapshot.roles().len(),
        fingerprint: snapshot.fingerprint().to_string(),
        installed_at: snapshot.installed_at(),
        sync_running: state.sync.is_running(),
        last_sync: state.sync.last_report(),
    }))
}
