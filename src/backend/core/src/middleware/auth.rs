//! Authentication middleware.
//!
//! Features:
//! - Bearer token extraction with strict framing
//! - JWT validation against the directory's signing certificate (RS256) or a
//!   shared secret (HS256)
//! - Tenant check on both the token and the directory record
//! - Fresh role lookup in the directory on every request
//! - [`Principal`] injection into request extensions
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_core::middleware::auth::{AuthLayer, Authenticator, TokenConfig};
//!
//! let tokens = TokenConfig::builder().rsa_certificate(pem).build();
//! let authenticator = Authenticator::new(tokens, tenant, directory)?;
//!
//! let app = Router::new()
//!     .route("/api/me", get(me))
//!     .layer(AuthLayer::new(Arc::new(authenticator)));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use futures::future::BoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    task::{Context, Poll},
};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::directory::{DirectoryError, IdentityDirectory};
use crate::rbac::models::{DomainId, Principal, UserId};

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Authorization header is not a bearer token")]
    InvalidFormat,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token belongs to tenant '{actual}', expected '{expected}'")]
    WrongTenant { expected: String, actual: String },

    #[error("User '{0}' is not known to the directory")]
    UnknownUser(String),

    #[error("Identity directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Identity directory refused the user lookup: {0}")]
    DirectoryRejected(String),

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::WrongTenant { .. } => "WRONG_TENANT",
            Self::UnknownUser(_) => "UNKNOWN_USER",
            Self::DirectoryUnavailable(_) => "DIRECTORY_UNAVAILABLE",
            Self::DirectoryRejected(_) => "DIRECTORY_REJECTED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials
            | Self::InvalidFormat
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::UnknownUser(_) => StatusCode::UNAUTHORIZED,
            Self::WrongTenant { .. } => StatusCode::FORBIDDEN,
            Self::DirectoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DirectoryRejected(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match &self {
            Self::MissingCredentials => "Authentication credentials are required",
            Self::InvalidFormat => "Expected 'Authorization: Bearer <token>'",
            Self::InvalidToken => "The provided token is invalid",
            Self::TokenExpired => "The authentication token has expired",
            Self::WrongTenant { .. } => "The token was issued for another tenant",
            Self::UnknownUser(_) => "The token subject is not a known user",
            Self::DirectoryUnavailable(_) => "The identity directory is unavailable",
            Self::DirectoryRejected(_) => "The identity directory refused the lookup",
            Self::Internal(_) => "An authentication error occurred",
        };

        counter!(
            "portcullis_auth_failures_total",
            "reason" => code
        )
        .increment(1);

        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// Claims carried by directory-issued access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Tenant the user belongs to
    pub owner: String,

    /// User name, unique within the tenant
    pub name: String,

    /// Subject (directory user id)
    #[serde(default)]
    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,

    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Everything else the directory puts in the token (including `aud`)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Create claims with builder pattern.
    pub fn builder(owner: impl Into<String>, name: impl Into<String>) -> ClaimsBuilder {
        ClaimsBuilder::new(owner, name)
    }
}

/// Builder for JWT claims.
pub struct ClaimsBuilder {
    claims: Claims,
}

impl ClaimsBuilder {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        let owner = owner.into();
        let name = name.into();
        Self {
            claims: Claims {
                sub: format!("{}/{}", owner, name),
                owner,
                name,
                email: String::new(),
                display_name: String::new(),
                iat: now.timestamp(),
                exp: (now + Duration::hours(1)).timestamp(),
                iss: None,
                extra: HashMap::new(),
            },
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.claims.email = email.into();
        self
    }

    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.claims.exp = (Utc::now() + duration).timestamp();
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.claims.iss = Some(issuer.into());
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        let audience: String = audience.into();
        self.claims
            .extra
            .insert("aud".to_string(), serde_json::json!([audience]));
        self
    }

    pub fn build(self) -> Claims {
        self.claims
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Token verification settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub algorithm: Algorithm,
    /// Shared secret for HMAC algorithms
    pub secret: Option<String>,
    /// PEM certificate or public key for RSA algorithms
    pub public_key_pem: Option<String>,
    pub leeway_secs: u64,
    pub audience: Option<String>,
    pub issuer: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RS256,
            secret: None,
            public_key_pem: None,
            leeway_secs: 60,
            audience: None,
            issuer: None,
        }
    }
}

impl TokenConfig {
    pub fn builder() -> TokenConfigBuilder {
        TokenConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct TokenConfigBuilder {
    config: TokenConfig,
}

impl TokenConfigBuilder {
    pub fn hmac_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.algorithm = Algorithm::HS256;
        self.config.secret = Some(secret.into());
        self
    }

    pub fn rsa_certificate(mut self, pem: impl Into<String>) -> Self {
        self.config.algorithm = Algorithm::RS256;
        self.config.public_key_pem = Some(pem.into());
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.config.algorithm = algorithm;
        self
    }

    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.config.audience = Some(audience.into());
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = Some(issuer.into());
        self
    }

    pub fn build(self) -> TokenConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Authenticator
// ═══════════════════════════════════════════════════════════════════════════════

/// Turns an `Authorization` header into a [`Principal`].
pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    tenant: DomainId,
    directory: Arc<dyn IdentityDirectory>,
}

impl Authenticator {
    /// Create a new authenticator.
    pub fn new(
        config: TokenConfig,
        tenant: DomainId,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Result<Self, AuthError> {
        let decoding_key = match config.algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config
                    .secret
                    .as_ref()
                    .ok_or_else(|| AuthError::Internal("JWT secret required for HMAC algorithms".into()))?;

                DecodingKey::from_secret(secret.as_bytes())
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                let pem = config
                    .public_key_pem
                    .as_ref()
                    .ok_or_else(|| AuthError::Internal("Certificate required for RSA algorithms".into()))?;

                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::Internal(format!("Invalid RSA certificate: {}", e)))?
            }
            _ => {
                return Err(AuthError::Internal(format!(
                    "Unsupported JWT algorithm: {:?}",
                    config.algorithm
                )));
            }
        };

        let mut validation = Validation::new(config.algorithm);
        validation.leeway = config.leeway_secs;

        match config.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            decoding_key,
            validation,
            tenant,
            directory,
        })
    }

    pub fn tenant(&self) -> &DomainId {
        &self.tenant
    }

    /// Authenticate a request from its headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?;
        let value = header.to_str().map_err(|_| AuthError::InvalidFormat)?;
        let token = extract_bearer(value)?;

        let claims = self.validate_token(token)?;
        if claims.name.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        self.check_tenant(&claims.owner)?;

        let user = match self.directory.get_user(&claims.name).await {
            Ok(Some(user)) => user,
            Ok(None) | Err(DirectoryError::NotFound(_)) => {
                return Err(AuthError::UnknownUser(claims.name));
            }
            Err(e) if e.is_unavailable() => {
                warn!(user = %claims.name, error = %e, "Directory lookup failed during authentication");
                return Err(AuthError::DirectoryUnavailable(e.to_string()));
            }
            Err(e) => {
                warn!(user = %claims.name, error = %e, "Directory refused user lookup during authentication");
                return Err(AuthError::DirectoryRejected(e.to_string()));
            }
        };
        self.check_tenant(&user.owner)?;

        let email = if user.email.is_empty() { claims.email } else { user.email.clone() };
        Ok(Principal {
            user_id: UserId::new(user.name.as_str()),
            owner: DomainId::new(user.owner.as_str()),
            email: (!email.is_empty()).then_some(email),
            display_name: (!user.display_name.is_empty()).then(|| user.display_name.clone()),
            roles: user.role_ids(),
        })
    }

    /// Verify signature, structure and expiry.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken,
                }
            })
    }

    fn check_tenant(&self, owner: &str) -> Result<(), AuthError> {
        if owner == self.tenant.as_str() {
            Ok(())
        } else {
            Err(AuthError::WrongTenant {
                expected: self.tenant.to_string(),
                actual: owner.to_string(),
            })
        }
    }
}

/// Strip the `Bearer ` prefix. The remainder must be a single non-empty token.
fn extract_bearer(value: &str) -> Result<&str, AuthError> {
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::InvalidFormat)?
        .trim();

    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication layer for Tower.
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    /// Create a new auth layer.
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticator.authenticate(request.headers()).await {
                Ok(principal) => {
                    debug!(user = %principal.user_id, "Request authenticated");
                    request.extensions_mut().insert(principal);
                    inner.call(request).await
                }
                Err(e) => {
                    debug!(error = %e, "Authentication failed");
                    Ok(e.into_response())
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// Extractor for the authenticated principal in handlers.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryRole, DirectoryUser, InMemoryDirectory};
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "super-secret-key-for-testing-only";

    fn directory() -> Arc<InMemoryDirectory> {
        Arc::new(
            InMemoryDirectory::new()
                .with_user(
                    DirectoryUser::new("acme", "alice")
                        .with_email("alice@acme.test")
                        .with_role(DirectoryRole::new("acme", "admin")),
                )
                .with_user(DirectoryUser::new("other", "mallory")),
        )
    }

    fn authenticator(directory: Arc<InMemoryDirectory>) -> Authenticator {
        let tokens = TokenConfig::builder().hmac_secret(SECRET).leeway_secs(0).build();
        Authenticator::new(tokens, DomainId::new("acme"), directory).unwrap()
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn sign(secret: &str, claims: &Claims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn bearer(claims: Claims) -> HeaderMap {
        headers(&format!("Bearer {}", sign(SECRET, &claims)))
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer("bearer abc").unwrap(), "abc");
        assert!(matches!(extract_bearer("Basic abc"), Err(AuthError::InvalidFormat)));
        assert!(matches!(extract_bearer("Bearer "), Err(AuthError::InvalidFormat)));
        assert!(matches!(extract_bearer("Bearer a b"), Err(AuthError::InvalidFormat)));
        assert!(matches!(extract_bearer("abc"), Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_rsa_requires_certificate() {
        let result = Authenticator::new(TokenConfig::default(), DomainId::new("acme"), directory());
        assert!(matches!(result, Err(AuthError::Internal(_))));

        let bad = TokenConfig::builder().rsa_certificate("not a pem").build();
        assert!(Authenticator::new(bad, DomainId::new("acme"), directory()).is_err());
    }

    #[tokio::test]
    async fn test_valid_token_builds_principal() {
        let auth = authenticator(directory());
        let principal = auth
            .authenticate(&bearer(Claims::builder("acme", "alice").build()))
            .await
            .unwrap();
        assert_eq!(principal.user_id.as_str(), "alice");
        assert_eq!(principal.owner.as_str(), "acme");
        assert_eq!(principal.email.as_deref(), Some("alice@acme.test"));
        assert_eq!(principal.roles, vec![crate::rbac::models::RoleId::new("admin")]);
    }

    #[tokio::test]
    async fn test_missing_and_malformed() {
        let auth = authenticator(directory());
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()).await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            auth.authenticate(&headers("Token xyz")).await,
            Err(AuthError::InvalidFormat)
        ));
        assert!(matches!(
            auth.authenticate(&headers("Bearer not.a.jwt")).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let auth = authenticator(directory());
        let claims = Claims::builder("acme", "alice")
            .expires_in(Duration::hours(-2))
            .build();
        assert!(matches!(
            auth.authenticate(&bearer(claims)).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_wrong_signature() {
        let auth = authenticator(directory());
        let token = sign("another-secret", &Claims::builder("acme", "alice").build());
        assert!(matches!(
            auth.authenticate(&headers(&format!("Bearer {}", token))).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_tenant_and_unknown_user() {
        let auth = authenticator(directory());
        assert!(matches!(
            auth.authenticate(&bearer(Claims::builder("other", "mallory").build())).await,
            Err(AuthError::WrongTenant { .. })
        ));
        assert!(matches!(
            auth.authenticate(&bearer(Claims::builder("acme", "ghost").build())).await,
            Err(AuthError::UnknownUser(name)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_directory_outage() {
        let directory = directory();
        let auth = authenticator(directory.clone());
        directory.fail_users(true);
        let err = auth
            .authenticate(&bearer(Claims::builder("acme", "alice").build()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_audience_checked_when_configured() {
        let tokens = TokenConfig::builder().hmac_secret(SECRET).audience("client-1").build();
        let auth = Authenticator::new(tokens, DomainId::new("acme"), directory()).unwrap();

        let good = Claims::builder("acme", "alice").audience("client-1").build();
        assert!(auth.authenticate(&bearer(good)).await.is_ok());

        let bad = Claims::builder("acme", "alice").audience("client-2").build();
        assert!(matches!(
            auth.authenticate(&bearer(bad)).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AuthError::MissingCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::UnknownUser("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::WrongTenant { expected: "a".into(), actual: "b".into() }.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AuthError::TokenExpired.code(), "TOKEN_EXPIRED");
        assert_eq!(
            AuthError::DirectoryRejected("HTTP 403".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
