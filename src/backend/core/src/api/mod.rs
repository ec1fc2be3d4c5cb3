//! HTTP API for the gateway.
//!
//! Public endpoints (`/health`, `/metrics`, `/login`, `/callback`) sit
//! outside authentication. Everything under `/api` passes through the
//! [`AuthLayer`] and then a per-route [`RequirePermissionLayer`]:
//!
//! | Method | Path | Permission |
//! |---|---|---|
//! | GET | /api/me | authenticated |
//! | GET | /api/users | users:read |
//! | POST | /api/users | users:write |
//! | PUT | /api/users/:username | users:write |
//! | DELETE | /api/users/:username | users:delete |
//! | POST | /api/users/:username/roles | users:write |
//! | DELETE | /api/users/:username/roles/:role | users:write |
//! | GET | /api/roles | roles:read |
//! | POST | /api/roles | roles:write |
//! | PUT | /api/roles/:role | roles:write |
//! | DELETE | /api/roles/:role | roles:delete |
//! | POST | /api/rbac/sync | rbac:write |
//! | GET | /api/rbac/status | rbac:write |

mod handlers;
mod rbac;
mod roles;
mod users;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::directory::IdentityDirectory;
use crate::error::{GatewayError, Result};
use crate::middleware::{AuthLayer, Authenticator};
use crate::rbac::{
    models::is_valid_field, DirectorySync, DomainId, EnforcementMode, PolicyEngine, PolicyStore,
    RequirePermissionLayer,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn IdentityDirectory>,
    pub engine: Arc<PolicyEngine>,
    pub authenticator: Arc<Authenticator>,
    pub sync: Arc<DirectorySync>,
    /// Present when the Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    pub enforcement: EnforcementMode,
    /// Sent to the directory as the OAuth `redirect_uri`.
    pub redirect_url: String,
}

impl AppState {
    /// Tenant served by this gateway.
    pub fn tenant(&self) -> &DomainId {
        self.authenticator.tenant()
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        self.engine.store()
    }

    fn guard(&self, permission: &str) -> RequirePermissionLayer {
        RequirePermissionLayer::new(self.engine.clone(), self.tenant().clone(), permission)
            .with_mode(self.enforcement)
    }
}

/// Build the gateway router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState { directory, engine, authenticator, sync, metrics, enforcement, redirect_url };
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Full paths rather than `nest`, so the guards see the request path unchanged.
    let api = Router::new()
        .route("/api/me", get(handlers::me))
        .route(
            "/api/users",
            get(users::list_users)
                .route_layer(state.guard("users:read"))
                .merge(post(users::create_user).route_layer(state.guard("users:write"))),
        )
        .route(
            "/api/users/:username",
            put(users::update_user)
                .route_layer(state.guard("users:write"))
                .merge(delete(users::delete_user).route_layer(state.guard("users:delete"))),
        )
        .route(
            "/api/users/:username/roles",
            post(users::assign_role).route_layer(state.guard("users:write")),
        )
        .route(
            "/api/users/:username/roles/:role",
            delete(users::remove_role).route_layer(state.guard("users:write")),
        )
        .route(
            "/api/roles",
            get(roles::list_roles)
                .route_layer(state.guard("roles:read"))
                .merge(post(roles::create_role).route_layer(state.guard("roles:write"))),
        )
        .route(
            "/api/roles/:role",
            put(roles::update_role)
                .route_layer(state.guard("roles:write"))
                .merge(delete(roles::delete_role).route_layer(state.guard("roles:delete"))),
        )
        .route(
            "/api/rbac/sync",
            post(rbac::sync_policy).route_layer(state.guard("rbac:write")),
        )
        .route(
            "/api/rbac/status",
            get(rbac::policy_status).route_layer(state.guard("rbac:write")),
        )
        .route_layer(AuthLayer::new(state.authenticator.clone()));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// Reject names the directory or the policy file cannot carry.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    if !is_valid_field(name) || name.contains('/') || name.trim() != name {
        return Err(GatewayError::validation(format!("Invalid {} name: '{}'", kind, name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("user", "alice").is_ok());
        assert!(validate_name("user", "").is_err());
        assert!(validate_name("user", "a,b").is_err());
        assert!(validate_name("user", "acme/alice").is_err());
        assert!(validate_name("role", " admin").is_err());
    }
}
