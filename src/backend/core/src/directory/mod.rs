//! Identity directory access.
//!
//! The gateway talks to its directory only through [`IdentityDirectory`].
//! [`HttpDirectory`] speaks the Casdoor REST API; [`InMemoryDirectory`]
//! backs tests and local runs.

pub mod cert;
pub mod client;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use cert::{CertificateChain, CertificateError, CertificateProvider};
pub use client::HttpDirectory;
pub use memory::InMemoryDirectory;
pub use models::{DirectoryRole, DirectoryUser, OAuthToken};

/// Errors from directory calls.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Directory did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Directory answered with server error {0}")]
    Status(reqwest::StatusCode),

    #[error("Directory rejected the request: {0}")]
    Rejected(String),

    #[error("Directory returned an unexpected payload: {0}")]
    Decode(String),

    #[error("Directory record not found: {0}")]
    NotFound(String),

    #[error("Invalid directory endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Operation not supported by this directory: {0}")]
    Unsupported(&'static str),
}

impl DirectoryError {
    /// True for failures that mean "the directory is unreachable or unwell",
    /// as opposed to a well-formed refusal.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Decode(_) | Self::Status(_)
        )
    }
}

/// The narrow interface the gateway consumes from its identity directory.
///
/// Reads are scoped to the configured organization by the implementation;
/// callers still filter by owner before trusting a record.
#[async_trait]
pub trait IdentityDirectory: Send + Sync + 'static {
    /// All roles visible to the gateway.
    async fn get_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError>;

    /// All users visible to the gateway, with their roles.
    async fn get_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;

    /// One user by name, `None` when the directory has no such user.
    async fn get_user(&self, name: &str) -> Result<Option<DirectoryUser>, DirectoryError>;

    async fn add_user(&self, user: DirectoryUser) -> Result<(), DirectoryError>;

    async fn update_user(&self, user: DirectoryUser) -> Result<(), DirectoryError>;

    async fn delete_user(&self, name: &str) -> Result<(), DirectoryError>;

    async fn add_role(&self, role: DirectoryRole) -> Result<(), DirectoryError>;

    async fn update_role(&self, role: DirectoryRole) -> Result<(), DirectoryError>;

    async fn delete_role(&self, name: &str) -> Result<(), DirectoryError>;

    /// URL a browser should visit to sign in.
    fn signin_url(&self, redirect_url: &str) -> Result<String, DirectoryError>;

    /// Exchange an OAuth authorization code for an access token.
    async fn exchange_code(&self, code: &str, state: &str) -> Result<OAuthToken, DirectoryError>;

    /// Add `role` to the user's role list. A role the user already holds is
    /// left alone.
    async fn assign_role(&self, user: &str, role: DirectoryRole) -> Result<(), DirectoryError> {
        let mut record = self
            .get_user(user)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(format!("user '{}'", user)))?;
        if record.holds_role(&role.name) {
            return Ok(());
        }
        record.roles.push(role);
        self.update_user(record).await
    }

    /// Remove `role` from the user's role list.
    async fn remove_role(&self, user: &str, role: &str) -> Result<(), DirectoryError> {
        let mut record = self
            .get_user(user)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(format!("user '{}'", user)))?;
        record.roles.retain(|r| r.name != role);
        self.update_user(record).await
    }
}
