#![allow(clippy::result_large_err)]
//! # Portcullis Core
//!
//! An RBAC gateway in front of an external identity directory.
//!
//! ## Architecture
//!
//! - **Directory**: client for the identity directory (users, roles, OAuth, certificate)
//! - **Policy Store**: immutable snapshots swapped atomically on every sync
//! - **Directory Sync**: rebuilds the policy from directory roles and permission templates
//! - **Authenticator**: verifies bearer tokens and resolves the principal
//! - **Enforcement Engine**: tenant-scoped, deny-overrides decisions with self-access
//! - **Observability**: structured logging, optional OTLP tracing, Prometheus metrics

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod rbac;

pub use error::{ErrorCode, ErrorSeverity, GatewayError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::config::Config;
    pub use crate::directory::{
        DirectoryError, DirectoryRole, DirectoryUser, HttpDirectory, IdentityDirectory,
        InMemoryDirectory,
    };
    pub use crate::error::{ErrorCode, GatewayError, Result};
    pub use crate::middleware::{AuthError, AuthLayer, Authenticator, Claims, TokenConfig};
    pub use crate::rbac::{
        DirectorySync, DomainId, EnforcementMode, Grant, Permission, PermissionTemplates,
        PolicyDecision, PolicyEngine, PolicyError, PolicyFile, PolicySet, PolicyStore, Principal,
        RequirePermissionLayer, RoleAssignment, RoleId, SyncError, SyncReport, Target, UserId,
    };
}
