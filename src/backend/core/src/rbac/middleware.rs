//! Axum authorization middleware that enforces RBAC permissions on requests.
//!
//! This middleware reads the [`Principal`] injected by the auth middleware
//! and asks the policy engine whether the request may proceed. What is
//! checked depends on the [`EnforcementMode`]:
//!
//! - `route`: the fixed `resource:action` permission attached to the route.
//! - `path`: the normalized request path as object and the HTTP method as
//!   action. The matched route template, with its parameters written as
//!   `*`, is evaluated as a second name for the same object, so a grant on
//!   `/api/users/*` covers `/api/users/bob`.
//!
//! Requests for `/api/users/{name}` carry the named user record as their
//! target so that a principal may always act on itself. Sub-resources such
//! as `/api/users/{name}/roles` do not, so nobody grants themselves a role.

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::models::{DomainId, Permission, Principal, Target};
use super::path::normalize;
use super::policy::PolicyEngine;
use crate::error::GatewayError;
use crate::middleware::auth::AuthError;

const USER_RECORD_PREFIX: &str = "/api/users/";

/// Which request attributes are matched against grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Each route declares a fixed permission.
    #[default]
    Route,
    /// Object is the normalized path, action is the HTTP method.
    Path,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with permission enforcement.
///
/// # Example
///
/// ```rust,ignore
/// use portcullis_core::rbac::{RequirePermissionLayer, PolicyEngine};
///
/// let guard = RequirePermissionLayer::new(engine.clone(), domain.clone(), "users:read");
/// let app = Router::new()
///     .route("/api/users", get(list_users).route_layer(guard));
/// ```
#[derive(Clone)]
pub struct RequirePermissionLayer {
    engine: Arc<PolicyEngine>,
    domain: DomainId,
    permission: Permission,
    mode: EnforcementMode,
}

impl RequirePermissionLayer {
    /// Create a new layer requiring the given permission (e.g., `"users:read"`).
    pub fn new(engine: Arc<PolicyEngine>, domain: DomainId, permission_str: &str) -> Self {
        let permission = Permission::parse(permission_str)
            .unwrap_or_else(|| Permission::new(permission_str, "*"));
        Self::from_permission(engine, domain, permission)
    }

    /// Create from an already-parsed `Permission`.
    pub fn from_permission(engine: Arc<PolicyEngine>, domain: DomainId, permission: Permission) -> Self {
        Self {
            engine,
            domain,
            permission,
            mode: EnforcementMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: EnforcementMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermissionService {
            inner,
            engine: self.engine.clone(),
            domain: self.domain.clone(),
            permission: self.permission.clone(),
            mode: self.mode,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that enforces a required permission per request.
#[derive(Clone)]
pub struct RequirePermissionService<S> {
    inner: S,
    engine: Arc<PolicyEngine>,
    domain: DomainId,
    permission: Permission,
    mode: EnforcementMode,
}

impl<S> RequirePermissionService<S> {
    /// Objects and action to evaluate for a request.
    fn targets_for(&self, request: &Request<Body>) -> (Vec<Target>, String) {
        let path = request.uri().path();
        let (objects, action) = match self.mode {
            EnforcementMode::Route => (
                vec![self.permission.resource.clone()],
                self.permission.action.clone(),
            ),
            EnforcementMode::Path => {
                let mut objects = vec![normalize(path)];
                if let Some(matched) = request.extensions().get::<MatchedPath>() {
                    let template = route_template(matched.as_str());
                    if !objects.contains(&template) {
                        objects.push(template);
                    }
                }
                (objects, request.method().as_str().to_string())
            }
        };

        let record = user_record(path);
        let targets = objects
            .into_iter()
            .map(|object| match record {
                Some(name) => Target::record(object, self.domain.clone(), name),
                None => Target::resource(object),
            })
            .collect();
        (targets, action)
    }
}

impl<S> Service<Request<Body>> for RequirePermissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        let domain = self.domain.clone();
        let (targets, action) = self.targets_for(&request);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Principal set by upstream auth middleware.
            let principal = match request.extensions().get::<Principal>().cloned() {
                Some(principal) => principal,
                None => return Ok(AuthError::MissingCredentials.into_response()),
            };

            let decision = engine.decide_any(&principal, &domain, &targets, &action);
            if decision.is_denied() {
                let object = targets.first().map(|t| t.object.as_str()).unwrap_or_default();
                warn!(
                    user_id = %principal.user_id,
                    object = %object,
                    action = %action,
                    domain = %domain,
                    "Permission denied"
                );
                return Ok(GatewayError::forbidden(format!(
                    "You do not have permission: {}:{}",
                    object, action
                ))
                .into_response());
            }

            inner.call(request).await
        })
    }
}

/// Route pattern with every `:param` or `*rest` segment written as `*`.
fn route_template(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| {
            if segment.starts_with(':') || segment.starts_with('*') {
                "*"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// User name addressed by exactly `/api/users/{name}`, if any.
fn user_record(path: &str) -> Option<&str> {
    path.strip_prefix(USER_RECORD_PREFIX)
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::{Grant, RoleAssignment};
    use crate::rbac::store::{PolicySet, PolicyStore};
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn engine() -> Arc<PolicyEngine> {
        let set = PolicySet::new(
            vec![
                Grant::allow("user", "acme", "users", "read").unwrap(),
                Grant::allow("user", "acme", "/api/items/7/parts/*", "GET").unwrap(),
                Grant::allow("user", "acme", "/api/users/*", "GET").unwrap(),
            ],
            vec![RoleAssignment::new("bob", "user", "acme")],
        );
        Arc::new(PolicyEngine::new(Arc::new(PolicyStore::with_policy(set).unwrap())))
    }

    fn app(permission: &str, mode: EnforcementMode) -> Router {
        let guard = RequirePermissionLayer::new(engine(), DomainId::new("acme"), permission).with_mode(mode);
        Router::new()
            .route("/api/users", get(|| async { "ok" }).route_layer(guard.clone()))
            .route("/api/users/:name", get(|| async { "ok" }).route_layer(guard.clone()))
            .route("/api/items/:id/parts/:part", get(|| async { "ok" }).route_layer(guard))
    }

    async fn call(app: Router, path: &str, principal: Option<Principal>) -> StatusCode {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        if let Some(principal) = principal {
            request.extensions_mut().insert(principal);
        }
        app.oneshot(request).await.unwrap().status()
    }

    #[test]
    fn test_layer_parse() {
        let layer = RequirePermissionLayer::new(engine(), DomainId::new("acme"), "users:write");
        assert_eq!(layer.permission.resource, "users");
        assert_eq!(layer.permission.action, "write");
        assert_eq!(layer.mode, EnforcementMode::Route);
    }

    #[test]
    fn test_route_template() {
        assert_eq!(route_template("/api/users"), "/api/users");
        assert_eq!(route_template("/api/users/:username"), "/api/users/*");
        assert_eq!(route_template("/api/users/:username/roles/:role"), "/api/users/*/roles/*");
        assert_eq!(route_template("/files/*rest"), "/files/*");
    }

    #[test]
    fn test_user_record() {
        assert_eq!(user_record("/api/users/alice"), Some("alice"));
        assert_eq!(user_record("/api/users/alice/"), Some("alice"));
        assert_eq!(user_record("/api/users/alice/roles/admin"), None);
        assert_eq!(user_record("/api/users/"), None);
        assert_eq!(user_record("/api/users"), None);
        assert_eq!(user_record("/api/roles/admin"), None);
    }

    #[tokio::test]
    async fn test_route_mode() {
        let bob = Principal::new("bob", "acme");
        assert_eq!(call(app("users:read", EnforcementMode::Route), "/api/users", Some(bob.clone())).await, StatusCode::OK);
        assert_eq!(call(app("users:write", EnforcementMode::Route), "/api/users", Some(bob)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        assert_eq!(
            call(app("users:read", EnforcementMode::Route), "/api/users", None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_self_access_through_layer() {
        let carol = Principal::new("carol", "acme");
        let app = app("users:delete", EnforcementMode::Route);
        assert_eq!(call(app.clone(), "/api/users/carol", Some(carol.clone())).await, StatusCode::OK);
        assert_eq!(call(app, "/api/users/dave", Some(carol)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_path_mode_normalizes() {
        let bob = Principal::new("bob", "acme");
        let app = app("users:read", EnforcementMode::Path);
        assert_eq!(call(app.clone(), "/api/items/7/parts/3", Some(bob.clone())).await, StatusCode::OK);
        assert_eq!(call(app.clone(), "/api/items/7/parts/99", Some(bob.clone())).await, StatusCode::OK);
        assert_eq!(call(app.clone(), "/api/items/8/parts/3", Some(bob.clone())).await, StatusCode::FORBIDDEN);
        // In path mode the route permission is not consulted.
        assert_eq!(call(app, "/api/users", Some(bob)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_path_mode_matches_route_template() {
        let bob = Principal::new("bob", "acme");
        let app = app("users:write", EnforcementMode::Path);
        assert_eq!(call(app.clone(), "/api/users/dave", Some(bob.clone())).await, StatusCode::OK);
        assert_eq!(call(app, "/api/items/8/parts/3", Some(bob)).await, StatusCode::FORBIDDEN);
    }
}
