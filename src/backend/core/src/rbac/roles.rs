//! Permission templates: which permissions each directory role grants.
//!
//! Portcullis ships with three built-in templates:
//!
//! | Role    | Permissions                                                        |
//! |---------|--------------------------------------------------------------------|
//! | admin   | users read/write/delete, roles read/write/delete, rbac write       |
//! | manager | users read/write, roles read                                       |
//! | user    | users read                                                         |
//!
//! Path enforcement uses a second table keyed by request path and HTTP
//! method (`*` stands for one path parameter):
//!
//! | Role    | Paths                                                              |
//! |---------|--------------------------------------------------------------------|
//! | admin   | every `/api/users`, `/api/roles` and `/api/rbac` route             |
//! | manager | `GET /api/users`, `PUT /api/users/*`, `GET /api/roles`             |
//! | user    | `GET /api/users`                                                   |
//!
//! Either table can be replaced from configuration. Directory roles with no
//! template grant nothing and are skipped during sync.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use super::middleware::EnforcementMode;
use super::models::{Permission, RoleId};

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedRole {
    Admin,
    Manager,
    User,
}

impl PredefinedRole {
    /// Get the role identifier string.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::User => "user",
        }
    }

    /// Return the set of permissions for this predefined role.
    pub fn permissions(&self) -> BTreeSet<Permission> {
        let pairs: &[(&str, &str)] = match self {
            Self::Admin => &[
                ("users", "read"),
                ("users", "write"),
                ("users", "delete"),
                ("roles", "read"),
                ("roles", "write"),
                ("roles", "delete"),
                ("rbac", "write"),
            ],
            Self::Manager => &[("users", "read"), ("users", "write"), ("roles", "read")],
            Self::User => &[("users", "read")],
        };
        pairs
            .iter()
            .map(|(resource, action)| Permission::new(*resource, *action))
            .collect()
    }

    /// Path and method pairs for path enforcement.
    pub fn path_permissions(&self) -> BTreeSet<Permission> {
        let pairs: &[(&str, &str)] = match self {
            Self::Admin => &[
                ("/api/users", "GET"),
                ("/api/users", "POST"),
                ("/api/users/*", "GET"),
                ("/api/users/*", "PUT"),
                ("/api/users/*", "DELETE"),
                ("/api/users/*/roles", "POST"),
                ("/api/users/*/roles/*", "DELETE"),
                ("/api/roles", "GET"),
                ("/api/roles", "POST"),
                ("/api/roles/*", "PUT"),
                ("/api/roles/*", "DELETE"),
                ("/api/rbac/sync", "POST"),
                ("/api/rbac/status", "GET"),
            ],
            Self::Manager => &[
                ("/api/users", "GET"),
                ("/api/users/*", "PUT"),
                ("/api/roles", "GET"),
            ],
            Self::User => &[("/api/users", "GET")],
        };
        pairs
            .iter()
            .map(|(path, method)| Permission::new(*path, *method))
            .collect()
    }

    /// Return all predefined roles.
    pub fn all() -> Vec<PredefinedRole> {
        vec![Self::Admin, Self::Manager, Self::User]
    }
}

/// Rejected template configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Invalid permission '{permission}' in template for role '{role}'")]
    InvalidPermission { role: String, permission: String },

    #[error("Template role name must not be empty")]
    EmptyRole,
}

/// Role name to permission list, validated at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTemplates {
    templates: BTreeMap<RoleId, BTreeSet<Permission>>,
}

impl PermissionTemplates {
    /// The built-in table.
    pub fn defaults() -> Self {
        let templates = PredefinedRole::all()
            .into_iter()
            .map(|role| (RoleId::new(role.id()), role.permissions()))
            .collect();
        Self { templates }
    }

    /// The built-in path table.
    pub fn path_defaults() -> Self {
        let templates = PredefinedRole::all()
            .into_iter()
            .map(|role| (RoleId::new(role.id()), role.path_permissions()))
            .collect();
        Self { templates }
    }

    /// The built-in table matching how requests are enforced.
    pub fn for_mode(mode: EnforcementMode) -> Self {
        match mode {
            EnforcementMode::Route => Self::defaults(),
            EnforcementMode::Path => Self::path_defaults(),
        }
    }

    /// Build from `role -> ["resource:action", ...]`, as found in config.
    /// Path entries are written `"/api/users/*:PUT"`.
    pub fn from_config(raw: &HashMap<String, Vec<String>>) -> Result<Self, TemplateError> {
        let mut templates = BTreeMap::new();
        for (role, permissions) in raw {
            let role = role.trim();
            if role.is_empty() {
                return Err(TemplateError::EmptyRole);
            }
            let parsed = permissions
                .iter()
                .map(|p| {
                    Permission::parse(p).ok_or_else(|| TemplateError::InvalidPermission {
                        role: role.to_string(),
                        permission: p.clone(),
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            templates.insert(RoleId::new(role), parsed);
        }
        Ok(Self { templates })
    }

    /// Permissions for `role`, or `None` when the role has no template.
    pub fn permissions_for(&self, role: &RoleId) -> Option<&BTreeSet<Permission>> {
        self.templates.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.templates.keys()
    }
}

impl Default for PermissionTemplates {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let templates = PermissionTemplates::defaults();
        let admin = templates.permissions_for(&RoleId::new("admin")).unwrap();
        assert_eq!(admin.len(), 7);
        assert!(admin.contains(&Permission::new("rbac", "write")));

        let manager = templates.permissions_for(&RoleId::new("manager")).unwrap();
        assert!(manager.contains(&Permission::new("users", "write")));
        assert!(!manager.contains(&Permission::new("users", "delete")));

        let user = templates.permissions_for(&RoleId::new("user")).unwrap();
        assert_eq!(user.iter().collect::<Vec<_>>(), vec![&Permission::new("users", "read")]);

        assert!(templates.permissions_for(&RoleId::new("auditor")).is_none());
    }

    #[test]
    fn test_path_table() {
        let templates = PermissionTemplates::for_mode(EnforcementMode::Path);
        let admin = templates.permissions_for(&RoleId::new("admin")).unwrap();
        assert_eq!(admin.len(), 13);
        assert!(admin.contains(&Permission::new("/api/users/*", "DELETE")));
        assert!(admin.contains(&Permission::new("/api/rbac/sync", "POST")));

        let manager = templates.permissions_for(&RoleId::new("manager")).unwrap();
        assert!(manager.contains(&Permission::new("/api/users/*", "PUT")));
        assert!(!manager.contains(&Permission::new("/api/users", "POST")));

        let user = templates.permissions_for(&RoleId::new("user")).unwrap();
        assert_eq!(user.iter().collect::<Vec<_>>(), vec![&Permission::new("/api/users", "GET")]);

        assert_eq!(
            PermissionTemplates::for_mode(EnforcementMode::Route),
            PermissionTemplates::defaults()
        );
    }

    #[test]
    fn test_path_entries_from_config() {
        let mut raw = HashMap::new();
        raw.insert("auditor".to_string(), vec!["/api/users/*:GET".to_string()]);
        let templates = PermissionTemplates::from_config(&raw).unwrap();
        assert!(templates
            .permissions_for(&RoleId::new("auditor"))
            .unwrap()
            .contains(&Permission::new("/api/users/*", "GET")));
    }

    #[test]
    fn test_from_config() {
        let mut raw = HashMap::new();
        raw.insert(
            "auditor".to_string(),
            vec!["users:read".to_string(), "roles:read".to_string()],
        );
        let templates = PermissionTemplates::from_config(&raw).unwrap();
        assert_eq!(
            templates.permissions_for(&RoleId::new("auditor")).unwrap().len(),
            2
        );
        assert!(templates.permissions_for(&RoleId::new("admin")).is_none());
    }

    #[test]
    fn test_from_config_rejects_garbage() {
        let mut raw = HashMap::new();
        raw.insert("auditor".to_string(), vec!["users-read".to_string()]);
        assert_eq!(
            PermissionTemplates::from_config(&raw),
            Err(TemplateError::InvalidPermission {
                role: "auditor".to_string(),
                permission: "users-read".to_string(),
            })
        );

        let mut raw = HashMap::new();
        raw.insert(" ".to_string(), vec!["users:read".to_string()]);
        assert_eq!(
            PermissionTemplates::from_config(&raw),
            Err(TemplateError::EmptyRole)
        );
    }
}
