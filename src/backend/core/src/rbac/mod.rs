//! Role-Based Access Control (RBAC) for the gateway.
//!
//! This module provides:
//! - **Models**: grants, role assignments, principals and targets
//! - **Policy Store**: atomically swapped snapshots of the policy
//! - **Policy Engine**: evaluates whether a principal may act on a target
//! - **Permission Templates**: which permissions each directory role grants
//! - **Directory Sync**: rebuilds the store from the identity directory
//! - **Authorization Middleware**: Axum layer for request-level checks
//!
//! # Usage
//!
//! ```rust,ignore
//! use portcullis_core::rbac::{PolicyEngine, PolicyStore, Permission};
//!
//! let store = Arc::new(PolicyStore::new());
//! let engine = PolicyEngine::new(store.clone());
//!
//! let allowed = engine.check(&principal, &Permission::new("users", "read"));
//!
//! let app = Router::new()
//!     .route("/api/users", get(list_users).route_layer(
//!         RequirePermissionLayer::new(Arc::new(engine), tenant, "users:read"),
//!     ));
//! ```

pub mod middleware;
pub mod models;
pub mod path;
pub mod persist;
pub mod policy;
pub mod roles;
pub mod store;
pub mod sync;

pub use middleware::{EnforcementMode, RequirePermissionLayer, RequirePermissionService};
pub use models::{
    DomainId, Effect, Grant, Permission, Principal, RoleAssignment, RoleId, Target, UserId,
    WILDCARD,
};
pub use path::normalize;
pub use persist::{PersistError, PolicyFile};
pub use policy::{PolicyDecision, PolicyEngine, PolicyError};
pub use roles::{PermissionTemplates, PredefinedRole, TemplateError};
pub use store::{PolicySet, PolicySnapshot, PolicyStore};
pub use sync::{DirectorySync, SyncError, SyncReport};
