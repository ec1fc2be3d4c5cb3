//! Error handling for the gateway.
//!
//! This module provides:
//! - A crate-wide [`GatewayError`] with a stable [`ErrorCode`]
//! - HTTP status code mapping for API responses
//! - User-friendly messages vs detailed internal messages
//! - Severity-driven logging and an error counter
//! - Conversions from every component error
//!
//! Every error response uses the same envelope:
//!
//! ```json
//! { "success": false, "error": { "code": "FORBIDDEN", "numeric_code": 1101, "message": "..." } }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::directory::{CertificateError, DirectoryError};
use crate::middleware::auth::AuthError;
use crate::rbac::{PersistError, PolicyError, SyncError, TemplateError};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (1000-1099)
    MissingCredentials,
    InvalidFormat,
    InvalidToken,
    TokenExpired,
    UnknownUser,

    // Authorization (1100-1199)
    WrongTenant,
    Forbidden,

    // Directory (1200-1299)
    DirectoryUnavailable,
    DirectoryRejected,
    RecordNotFound,
    Unsupported,

    // Policy (1300-1399)
    SyncAlreadyInProgress,
    PolicyStoreCorrupt,
    ResourceExhausted,

    // Request (1400-1499)
    ValidationError,
    InvalidJson,

    // System (1900-1999)
    CertificateUnavailable,
    ConfigurationError,
    Timeout,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::MissingCredentials => 1000,
            Self::InvalidFormat => 1001,
            Self::InvalidToken => 1002,
            Self::TokenExpired => 1003,
            Self::UnknownUser => 1004,

            Self::WrongTenant => 1100,
            Self::Forbidden => 1101,

            Self::DirectoryUnavailable => 1200,
            Self::DirectoryRejected => 1201,
            Self::RecordNotFound => 1202,
            Self::Unsupported => 1203,

            Self::SyncAlreadyInProgress => 1300,
            Self::PolicyStoreCorrupt => 1301,
            Self::ResourceExhausted => 1302,

            Self::ValidationError => 1400,
            Self::InvalidJson => 1401,

            Self::CertificateUnavailable => 1900,
            Self::ConfigurationError => 1901,
            Self::Timeout => 1902,
            Self::InternalError => 1999,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials
            | Self::InvalidFormat
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::UnknownUser => StatusCode::UNAUTHORIZED,

            Self::WrongTenant | Self::Forbidden => StatusCode::FORBIDDEN,

            Self::DirectoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::DirectoryRejected => StatusCode::BAD_GATEWAY,
            Self::RecordNotFound => StatusCode::NOT_FOUND,
            Self::Unsupported => StatusCode::NOT_IMPLEMENTED,

            Self::SyncAlreadyInProgress => StatusCode::CONFLICT,

            Self::ValidationError | Self::InvalidJson => StatusCode::BAD_REQUEST,

            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            Self::PolicyStoreCorrupt
            | Self::ResourceExhausted
            | Self::CertificateUnavailable
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable | Self::SyncAlreadyInProgress | Self::Timeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "authentication",
            1100..=1199 => "authorization",
            1200..=1299 => "directory",
            1300..=1399 => "policy",
            1400..=1499 => "request",
            _ => "system",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Client errors (bad credentials, bad input, denied)
    Low,
    /// Operational issues (directory outage, contention)
    Medium,
    /// Gateway faults
    High,
    /// The gateway cannot make safe decisions
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::MissingCredentials
            | ErrorCode::InvalidFormat
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::UnknownUser
            | ErrorCode::WrongTenant
            | ErrorCode::Forbidden
            | ErrorCode::RecordNotFound
            | ErrorCode::ValidationError
            | ErrorCode::InvalidJson
            | ErrorCode::Unsupported => Self::Low,

            ErrorCode::DirectoryUnavailable
            | ErrorCode::DirectoryRejected
            | ErrorCode::SyncAlreadyInProgress
            | ErrorCode::Timeout => Self::Medium,

            ErrorCode::ResourceExhausted
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => Self::High,

            ErrorCode::PolicyStoreCorrupt | ErrorCode::CertificateUnavailable => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the gateway.
#[derive(Error, Debug)]
pub struct GatewayError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Extra fields returned to the client
    details: HashMap<String, serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl GatewayError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: HashMap::new(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_context("entity_type", entity_type)
        .with_context("entity_id", entity_id)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add a field to the client-visible details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Wire form of the code, e.g. `SYNC_ALREADY_IN_PROGRESS`.
    pub fn error_code(&self) -> String {
        serde_json::to_value(self.code)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "INTERNAL_ERROR".to_string())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "portcullis_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&GatewayError> for ErrorResponse {
    fn from(error: &GatewayError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: error.details.clone(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        let code = match &error {
            AuthError::MissingCredentials => ErrorCode::MissingCredentials,
            AuthError::InvalidFormat => ErrorCode::InvalidFormat,
            AuthError::InvalidToken => ErrorCode::InvalidToken,
            AuthError::TokenExpired => ErrorCode::TokenExpired,
            AuthError::WrongTenant { .. } => ErrorCode::WrongTenant,
            AuthError::UnknownUser(_) => ErrorCode::UnknownUser,
            AuthError::DirectoryUnavailable(_) => ErrorCode::DirectoryUnavailable,
            AuthError::DirectoryRejected(_) => ErrorCode::DirectoryRejected,
            AuthError::Internal(_) => ErrorCode::InternalError,
        };
        Self::with_internal(code, "Authentication failed", error.to_string()).with_source(error)
    }
}

impl From<DirectoryError> for GatewayError {
    fn from(error: DirectoryError) -> Self {
        let (code, message) = match &error {
            DirectoryError::Transport(_) | DirectoryError::Decode(_) | DirectoryError::Status(_) => (
                ErrorCode::DirectoryUnavailable,
                "The identity directory is unavailable",
            ),
            DirectoryError::Timeout(_) => (
                ErrorCode::DirectoryUnavailable,
                "The identity directory did not respond in time",
            ),
            DirectoryError::Rejected(_) => (
                ErrorCode::DirectoryRejected,
                "The identity directory rejected the request",
            ),
            DirectoryError::NotFound(_) => (ErrorCode::RecordNotFound, "Record not found"),
            DirectoryError::InvalidEndpoint(_) => (
                ErrorCode::ConfigurationError,
                "The identity directory endpoint is misconfigured",
            ),
            DirectoryError::Unsupported(_) => (
                ErrorCode::Unsupported,
                "Operation not supported by the identity directory",
            ),
        };
        Self::with_internal(code, message, error.to_string()).with_source(error)
    }
}

impl From<PolicyError> for GatewayError {
    fn from(error: PolicyError) -> Self {
        let code = match &error {
            PolicyError::Corrupt(_) => ErrorCode::PolicyStoreCorrupt,
            PolicyError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            PolicyError::InvalidTuple(_) => ErrorCode::ValidationError,
        };
        Self::with_internal(code, "Policy operation failed", error.to_string()).with_source(error)
    }
}

impl From<SyncError> for GatewayError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::AlreadyInProgress => Self::new(
                ErrorCode::SyncAlreadyInProgress,
                "A policy sync is already in progress",
            ),
            SyncError::DirectoryUnavailable { what, source } => Self::with_internal(
                ErrorCode::DirectoryUnavailable,
                "Policy sync failed: the identity directory is unavailable",
                format!("fetching {}: {}", what, source),
            )
            .with_source(source),
            SyncError::Policy(e) => Self::from(e),
            SyncError::Aborted(reason) => {
                Self::internal(format!("sync task aborted: {}", reason))
            }
        }
    }
}

impl From<PersistError> for GatewayError {
    fn from(error: PersistError) -> Self {
        Self::internal(error.to_string()).with_source(error)
    }
}

impl From<CertificateError> for GatewayError {
    fn from(error: CertificateError) -> Self {
        Self::with_internal(
            ErrorCode::CertificateUnavailable,
            "Token signing certificate unavailable",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<TemplateError> for GatewayError {
    fn from(error: TemplateError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Invalid permission templates",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(ErrorCode::InvalidJson, "Invalid JSON", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(format!("I/O error: {}", error)).with_source(error)
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", error))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::MissingCredentials.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::UnknownUser.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::WrongTenant.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::SyncAlreadyInProgress.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::DirectoryUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::TokenExpired.category(), "authentication");
        assert_eq!(ErrorCode::Forbidden.category(), "authorization");
        assert_eq!(ErrorCode::RecordNotFound.category(), "directory");
        assert_eq!(ErrorCode::PolicyStoreCorrupt.category(), "policy");
        assert_eq!(ErrorCode::InternalError.category(), "system");
    }

    #[test]
    fn test_sync_error_mapping() {
        let err = GatewayError::from(SyncError::AlreadyInProgress);
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "SYNC_ALREADY_IN_PROGRESS");
        assert!(err.is_retryable());

        let err = GatewayError::from(SyncError::DirectoryUnavailable {
            what: "users",
            source: DirectoryError::Timeout(std::time::Duration::from_secs(1)),
        });
        assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.internal_message().unwrap().contains("users"));
    }

    #[test]
    fn test_error_response_shape() {
        let err = GatewayError::not_found("user", "ghost");
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "RECORD_NOT_FOUND");
        assert_eq!(body["error"]["numeric_code"], 1202);
        assert_eq!(body["error"]["details"]["entity_id"], "ghost");
    }

    #[test]
    fn test_display_includes_internal() {
        let err = GatewayError::internal("boom");
        assert_eq!(err.to_string(), "[InternalError] An internal error occurred (internal: boom)");
    }
}
