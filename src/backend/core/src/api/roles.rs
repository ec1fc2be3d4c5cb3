//! Role management, passed through to the identity directory.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{validate_name, ApiResponse, AppState};
use crate::directory::DirectoryRole;
use crate::error::{GatewayError, Result};

#[derive(Debug, Serialize)]
pub struct RoleView {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_enabled: bool,
}

impl From<DirectoryRole> for RoleView {
    fn from(role: DirectoryRole) -> Self {
        Self {
            name: role.name,
            display_name: role.display_name,
            description: role.description,
            is_enabled: role.is_enabled,
        }
    }
}

pub async fn list_roles(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let tenant = state.tenant();
    let roles: Vec<RoleView> = state
        .directory
        .get_roles()
        .await?
        .into_iter()
        .filter(|r| r.is_owned_by(tenant))
        .map(RoleView::from)
        .collect();

    Ok(Json(ApiResponse::success(roles)))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

pub async fn create_role(
    State(state): State<AppState>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse> {
    validate_name("role", &req.name)?;

    let mut role = DirectoryRole::new(state.tenant().as_str(), req.name.as_str());
    if let Some(display_name) = req.display_name {
        role = role.with_display_name(display_name);
    }
    if let Some(description) = req.description {
        role.description = description;
    }

    state.directory.add_role(role.clone()).await?;
    info!(role = %role.name, "Role created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(RoleView::from(role)))))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub is_enabled: Option<bool>,
}

pub async fn update_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse> {
    let mut role = find_role(&state, &name).await?;

    if let Some(display_name) = req.display_name {
        role.display_name = display_name;
    }
    if let Some(description) = req.description {
        role.description = description;
    }
    if let Some(is_enabled) = req.is_enabled {
        role.is_enabled = is_enabled;
    }

    state.directory.update_role(role.clone()).await?;
    info!(role = %name, "Role updated");

    Ok(Json(ApiResponse::success(RoleView::from(role))))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    find_role(&state, &name).await?;
    state.directory.delete_role(&name).await?;
    info!(role = %name, "Role deleted");

    Ok(Json(ApiResponse::success(serde_json::json!({ "deleted": name }))))
}

async fn find_role(state: &AppState, name: &str) -> Result<DirectoryRole> {
    let tenant = state.tenant();
    state
        .directory
        .get_roles()
        .await?
        .into_iter()
        .find(|r| r.is_owned_by(tenant) && r.name == name)
        .ok_or_else(|| GatewayError::not_found("role", name))
}
