//! End-to-end tests for the HTTP surface.
//!
//! Tests cover:
//! - Public endpoints (health, metrics, login, callback)
//! - Authentication failures and their status codes
//! - Route permissions for every role template
//! - Self-access on the user record and its limits
//! - Role assignment followed by an automatic re-sync
//! - Path enforcement mode

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use portcullis_core::api::{build_router, AppState};
use portcullis_core::directory::{DirectoryRole, DirectoryUser, IdentityDirectory, InMemoryDirectory};
use portcullis_core::middleware::{Authenticator, Claims, TokenConfig};
use portcullis_core::rbac::{
    DirectorySync, DomainId, EnforcementMode, Grant, PermissionTemplates, PolicyEngine,
    PolicyStore,
};

const SECRET: &str = "integration-test-secret";

fn sign(claims: &Claims) -> String {
    encode(&Header::default(), claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    app: Router,
    directory: Arc<InMemoryDirectory>,
    store: Arc<PolicyStore>,
}

fn role(name: &str) -> DirectoryRole {
    DirectoryRole::new("acme", name)
}

fn seeded_directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_role(role("admin"))
        .with_role(role("manager"))
        .with_role(role("user"))
        .with_user(
            DirectoryUser::new("acme", "alice")
                .with_email("alice@acme.test")
                .with_role(role("admin")),
        )
        .with_user(DirectoryUser::new("acme", "bob").with_role(role("user")))
        .with_user(DirectoryUser::new("acme", "carol").with_role(role("manager")))
        .with_user(DirectoryUser::new("evil", "mallory").with_role(DirectoryRole::new("evil", "admin")))
}

async fn harness_with(mode: EnforcementMode) -> Harness {
    let directory = Arc::new(seeded_directory());
    let dyn_directory: Arc<dyn IdentityDirectory> = directory.clone();
    let tenant = DomainId::new("acme");

    let authenticator = Arc::new(
        Authenticator::new(
            TokenConfig::builder().hmac_secret(SECRET).build(),
            tenant.clone(),
            dyn_directory.clone(),
        )
        .unwrap(),
    );

    let store = Arc::new(PolicyStore::new());
    let sync = Arc::new(
        DirectorySync::new(dyn_directory.clone(), store.clone(), tenant)
            .with_templates(PermissionTemplates::for_mode(mode)),
    );
    sync.sync().await.unwrap();

    let state = AppState {
        directory: dyn_directory,
        engine: Arc::new(PolicyEngine::new(store.clone())),
        authenticator,
        sync,
        metrics: None,
        enforcement: mode,
        redirect_url: "http://localhost:9000/callback".to_string(),
    };

    Harness {
        app: build_router(state),
        directory,
        store,
    }
}

async fn harness() -> Harness {
    harness_with(EnforcementMode::Route).await
}

impl Harness {
    fn token(&self, owner: &str, name: &str) -> String {
        sign(&Claims::builder(owner, name).build())
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn get_as(&self, user: &str, uri: &str) -> (StatusCode, Value) {
        let token = self.token("acme", user);
        self.send(Method::GET, uri, Some(&token), None).await
    }
}

// ============================================================================
// Public Endpoints
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let h = harness().await;
    let (status, body) = h.send(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let h = harness().await;
    let (status, _) = h.send(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_login_returns_signin_url() {
    let h = harness().await;
    let (status, body) = h.send(Method::GET, "/login", None, None).await;

    assert_eq!(status, StatusCode::OK);
    let url = body["data"]["url"].as_str().unwrap();
    assert!(url.starts_with("memory://login"));
    assert!(url.contains("http://localhost:9000/callback"));
}

#[tokio::test]
async fn test_callback_requires_code() {
    let h = harness().await;
    let (status, body) = h.send(Method::GET, "/callback?state=gateway", None, None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_callback_surfaces_directory_error() {
    let h = harness().await;
    let (status, body) = h
        .send(Method::GET, "/callback?code=abc&state=gateway", None, None)
        .await;

    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let h = harness().await;
    let (status, _) = h.send(Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_credentials() {
    let h = harness().await;
    let (status, body) = h.send(Method::GET, "/api/me", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "MISSING_CREDENTIALS");
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let h = harness().await;
    let request = Request::builder()
        .uri("/api/me")
        .header(header::AUTHORIZATION, "Token abc")
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_token() {
    let h = harness().await;
    let (status, body) = h.send(Method::GET, "/api/me", Some("not.a.jwt"), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_expired_token() {
    let h = harness().await;
    let claims = Claims::builder("acme", "alice")
        .expires_in(chrono::Duration::hours(-2))
        .build();
    let token = sign(&claims);

    let (status, body) = h.send(Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn test_foreign_tenant_is_forbidden() {
    let h = harness().await;
    let token = h.token("evil", "mallory");

    let (status, body) = h.send(Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "WRONG_TENANT");
}

#[tokio::test]
async fn test_token_claiming_tenant_for_foreign_user() {
    let h = harness().await;
    // Claims say acme, the directory record says evil.
    let token = h.token("acme", "mallory");

    let (status, body) = h.send(Method::GET, "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "WRONG_TENANT");
}

#[tokio::test]
async fn test_unknown_user() {
    let h = harness().await;
    let (status, body) = h.get_as("ghost", "/api/me").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNKNOWN_USER");
}

#[tokio::test]
async fn test_directory_outage_during_authentication() {
    let h = harness().await;
    h.directory.fail_users(true);

    let (status, body) = h.get_as("alice", "/api/me").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "DIRECTORY_UNAVAILABLE");
}

#[tokio::test]
async fn test_me_returns_principal() {
    let h = harness().await;
    let (status, body) = h.get_as("alice", "/api/me").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user_id"], "alice");
    assert_eq!(body["data"]["tenant"], "acme");
    assert_eq!(body["data"]["email"], "alice@acme.test");
    assert_eq!(body["data"]["roles"], json!(["admin"]));
}

// ============================================================================
// Route Permissions
// ============================================================================

#[tokio::test]
async fn test_list_users_filters_tenant() {
    let h = harness().await;
    let (status, body) = h.get_as("bob", "/api/users").await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn test_user_role_cannot_write() {
    let h = harness().await;
    let token = h.token("acme", "bob");

    let (status, body) = h
        .send(Method::POST, "/api/users", Some(&token), Some(json!({ "name": "dave" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_admin_creates_user() {
    let h = harness().await;
    let token = h.token("acme", "alice");

    let (status, body) = h
        .send(
            Method::POST,
            "/api/users",
            Some(&token),
            Some(json!({ "name": "dave", "email": "dave@acme.test" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "dave");

    let dave = h.directory.get_user("dave").await.unwrap().unwrap();
    assert_eq!(dave.owner, "acme");
    assert_eq!(dave.email, "dave@acme.test");
}

#[tokio::test]
async fn test_create_user_rejects_bad_name() {
    let h = harness().await;
    let token = h.token("acme", "alice");

    let (status, _) = h
        .send(Method::POST, "/api/users", Some(&token), Some(json!({ "name": "a,b" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manager_reads_roles_but_cannot_delete_users() {
    let h = harness().await;
    let (status, _) = h.get_as("carol", "/api/roles").await;
    assert_eq!(status, StatusCode::OK);

    let token = h.token("acme", "carol");
    let (status, _) = h.send(Method::DELETE, "/api/users/bob", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_missing_user_is_not_found() {
    let h = harness().await;
    let token = h.token("acme", "alice");

    let (status, _) = h.send(Method::DELETE, "/api/users/ghost", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_manages_roles() {
    let h = harness().await;
    let token = h.token("acme", "alice");

    let (status, _) = h
        .send(
            Method::POST,
            "/api/roles",
            Some(&token),
            Some(json!({ "name": "auditor", "display_name": "Auditor" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = h
        .send(
            Method::PUT,
            "/api/roles/auditor",
            Some(&token),
            Some(json!({ "description": "read-only" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["description"], "read-only");

    let (status, _) = h.send(Method::DELETE, "/api/roles/auditor", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.send(Method::DELETE, "/api/roles/auditor", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Self-Access
// ============================================================================

#[tokio::test]
async fn test_user_updates_own_record() {
    let h = harness().await;
    let token = h.token("acme", "bob");

    let (status, body) = h
        .send(
            Method::PUT,
            "/api/users/bob",
            Some(&token),
            Some(json!({ "display_name": "Bobby" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["display_name"], "Bobby");

    let (status, _) = h
        .send(
            Method::PUT,
            "/api/users/carol",
            Some(&token),
            Some(json!({ "display_name": "Hacked" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_cannot_assign_own_role() {
    let h = harness().await;
    let token = h.token("acme", "bob");

    let (status, _) = h
        .send(
            Method::POST,
            "/api/users/bob/roles",
            Some(&token),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!h.directory.get_user("bob").await.unwrap().unwrap().holds_role("admin"));
}

// ============================================================================
// Role Assignment and Re-sync
// ============================================================================

#[tokio::test]
async fn test_assign_and_remove_role_resyncs() {
    let h = harness().await;
    let admin = h.token("acme", "alice");

    let (status, _) = h.get_as("bob", "/api/roles").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .send(
            Method::POST,
            "/api/users/bob/roles",
            Some(&admin),
            Some(json!({ "role": "manager" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["synced"], true);

    let (status, _) = h.get_as("bob", "/api/roles").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .send(Method::DELETE, "/api/users/bob/roles/manager", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["synced"], true);

    let (status, _) = h.get_as("bob", "/api/roles").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_assign_unknown_role() {
    let h = harness().await;
    let admin = h.token("acme", "alice");

    let (status, _) = h
        .send(
            Method::POST,
            "/api/users/bob/roles",
            Some(&admin),
            Some(json!({ "role": "wizard" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Policy Endpoints
// ============================================================================

#[tokio::test]
async fn test_sync_and_status() {
    let h = harness().await;
    let admin = h.token("acme", "alice");
    let before = h.store.snapshot().version();

    let (status, body) = h.send(Method::POST, "/api/rbac/sync", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grants"], 11);
    assert_eq!(body["data"]["assignments"], 3);
    assert_eq!(h.store.snapshot().version(), before + 1);

    let (status, body) = h.get_as("alice", "/api/rbac/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["domain"], "acme");
    assert_eq!(body["data"]["grants"], 11);
    assert_eq!(body["data"]["fingerprint"].as_str().unwrap().len(), 64);
    assert_eq!(body["data"]["sync_running"], false);
    assert!(body["data"]["last_sync"]["completed_at"].is_string());
}

#[tokio::test]
async fn test_sync_requires_rbac_write() {
    let h = harness().await;
    let token = h.token("acme", "carol");

    let (status, _) = h.send(Method::POST, "/api/rbac/sync", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sync_outage_is_unavailable() {
    let h = harness().await;
    let admin = h.token("acme", "alice");
    let before = h.store.snapshot();

    h.directory.fail_roles(true);
    let (status, body) = h.send(Method::POST, "/api/rbac/sync", Some(&admin), None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "DIRECTORY_UNAVAILABLE");
    assert_eq!(h.store.snapshot().fingerprint(), before.fingerprint());
}

// ============================================================================
// Path Enforcement
// ============================================================================

#[tokio::test]
async fn test_path_mode_uses_path_and_method() {
    let h = harness_with(EnforcementMode::Path).await;
    let admin = h.token("acme", "alice");
    let user = h.token("acme", "bob");
    let manager = h.token("acme", "carol");

    let (status, _) = h.get_as("alice", "/api/users").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .send(Method::POST, "/api/users", Some(&admin), Some(json!({ "name": "dave" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = h.get_as("bob", "/api/users").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .send(Method::POST, "/api/users", Some(&user), Some(json!({ "name": "erin" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let rename = json!({ "display_name": "Renamed" });
    let (status, _) = h
        .send(Method::PUT, "/api/users/alice", Some(&user), Some(rename.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h
        .send(Method::PUT, "/api/users/bob", Some(&user), Some(rename.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .send(Method::PUT, "/api/users/bob", Some(&manager), Some(rename))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.send(Method::POST, "/api/rbac/sync", Some(&manager), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = h.send(Method::POST, "/api/rbac/sync", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grants"], 17);
}

#[tokio::test]
async fn test_path_mode_honours_added_grants() {
    let h = harness_with(EnforcementMode::Path).await;

    let (status, _) = h.get_as("bob", "/api/roles").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.store
        .add_grant(Grant::allow("user", "acme", "/api/roles", "GET").unwrap())
        .unwrap();
    let (status, _) = h.get_as("bob", "/api/roles").await;
    assert_eq!(status, StatusCode::OK);
}
