//! User management, passed through to the identity directory.
//!
//! Role assignment changes trigger a policy re-sync so the new role takes
//! effect without waiting for the next scheduled or manual sync.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{validate_name, ApiResponse, AppState};
use crate::directory::{DirectoryError, DirectoryUser};
use crate::error::{GatewayError, Result};
use crate::rbac::SyncError;

#[derive(Debug, Serialize)]
pub struct UserView {
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<DirectoryUser> for UserView {
    fn from(user: DirectoryUser) -> Self {
        Self {
            roles: user.roles.into_iter().map(|r| r.name).collect(),
            name: user.name,
            display_name: user.display_name,
            email: user.email,
        }
    }
}

pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let tenant = state.tenant();
    let users: Vec<UserView> = state
        .directory
        .get_users()
        .await?
        .into_iter()
        .filter(|u| u.is_owned_by(tenant))
        .map(UserView::from)
        .collect();

    Ok(Json(ApiResponse::success(users)))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    validate_name("user", &req.name)?;

    let mut user = DirectoryUser::new(state.tenant().as_str(), req.name.as_str());
    if let Some(display_name) = req.display_name {
        user = user.with_display_name(display_name);
    }
    if let Some(email) = req.email {
        user = user.with_email(email);
    }
    user.password = req.password;

    state.directory.add_user(user.clone()).await?;
    info!(user = %user.name, "User created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(UserView::from(user)))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse> {
    let mut user = find_user(&state, &username).await?;

    if let Some(display_name) = req.display_name {
        user.display_name = display_name;
    }
    if let Some(email) = req.email {
        user.email = email;
    }
    user.password = req.password;

    state.directory.update_user(user.clone()).await?;
    info!(user = %username, "User updated");

    Ok(Json(ApiResponse::success(UserView::from(user))))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse> {
    find_user(&state, &username).await?;
    state.directory.delete_user(&username).await?;
    info!(user = %username, "User deleted");

    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": username }))))
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct RoleChange {
    pub user: String,
    pub role: String,
    /// Whether the policy was re-synced by this request.
    pub synced: bool,
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse> {
    validate_name("role", &req.role)?;
    find_user(&state, &username).await?;

    let tenant = state.tenant();
    let role = state
        .directory
        .get_roles()
        .await?
        .into_iter()
        .find(|r| r.is_owned_by(tenant) && r.name == req.role)
        .ok_or_else(|| GatewayError::not_found("role", req.role.as_str()))?;

    state.directory.assign_role(&username, role).await?;
    info!(user = %username, role = %req.role, "Role assigned");

    let synced = resync(&state).await;
    Ok(Json(ApiResponse::success(RoleChange {
        user: username,
        role: req.role,
        synced,
    })))
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path((username, role)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    state
        .directory
        .remove_role(&username, &role)
        .await
        .map_err(|e| match e {
            DirectoryError::NotFound(_) => GatewayError::not_found("user", username.as_str()),
            other => other.into(),
        })?;
    info!(user = %username, role = %role, "Role removed");

    let synced = resync(&state).await;
    Ok(Json(ApiResponse::success(RoleChange {
        user: username,
        role,
        synced,
    })))
}

/// Tenant user by name, or 404.
async fn find_user(state: &AppState, username: &str) -> Result<DirectoryUser> {
    state
        .directory
        .get_user(username)
        .await?
        .filter(|u| u.is_owned_by(state.tenant()))
        .ok_or_else(|| GatewayError::not_found("user", username))
}

/// Re-sync after a role change. The directory change already happened, so a
/// failed or contended sync is reported rather than returned as an error.
async fn resync(state: &AppState) -> bool {
    match state.sync.trigger().await {
        Ok(_) => true,
        Err(SyncError::AlreadyInProgress) => {
            info!("Sync already running, role change picked up by the next sync");
            false
        }
        Err(e) => {
            warn!(error = %e, "Policy re-sync after role change failed");
            false
        }
    }
}
