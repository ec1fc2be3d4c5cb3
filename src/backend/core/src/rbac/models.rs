//! RBAC data models: identifiers, permissions, grants, role assignments,
//! principals and enforcement targets.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::policy::PolicyError;

/// Matches any subject, domain, object or action in a grant.
pub const WILDCARD: &str = "*";

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed user identifier (the directory's user `name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed role identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Strongly-typed domain (tenant) identifier. In the directory this is the
/// `owner` of users and roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain that matches every tenant.
    pub fn any() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DomainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A permission represents an action on a resource type.
///
/// Permissions follow the format `resource:action`, for example:
/// - `users:read`
/// - `roles:delete`
/// - `rbac:write`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    /// The resource type (e.g., "users", "roles", "rbac").
    pub resource: String,
    /// The action (e.g., "read", "write", "delete").
    pub action: String,
}

impl Permission {
    /// Create a new permission.
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse a permission from a colon-separated string like `"users:read"`.
    ///
    /// Both halves must be non-empty and free of the characters the policy
    /// file uses as separators.
    pub fn parse(s: &str) -> Option<Self> {
        let (resource, action) = s.split_once(':')?;
        let (resource, action) = (resource.trim(), action.trim());
        if !is_valid_field(resource) || !is_valid_field(action) {
            return None;
        }
        Some(Self::new(resource, action))
    }

    /// Return the canonical string form `"resource:action"`.
    pub fn as_string(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grant
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether a matching grant permits or forbids the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Default for Effect {
    fn default() -> Self {
        Self::Allow
    }
}

/// A policy tuple `(subject, domain, object, action, effect)`.
///
/// The subject is a role name or a user name. Any field may be [`WILDCARD`].
/// Grants are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    subject: String,
    domain: DomainId,
    object: String,
    action: String,
    #[serde(default)]
    effect: Effect,
}

impl Grant {
    /// Build an allow grant, rejecting empty fields and separator characters.
    pub fn allow(
        subject: impl Into<String>,
        domain: impl Into<DomainId>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        Self::with_effect(subject, domain, object, action, Effect::Allow)
    }

    /// Build a deny grant.
    pub fn deny(
        subject: impl Into<String>,
        domain: impl Into<DomainId>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        Self::with_effect(subject, domain, object, action, Effect::Deny)
    }

    pub fn with_effect(
        subject: impl Into<String>,
        domain: impl Into<DomainId>,
        object: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
    ) -> Result<Self, PolicyError> {
        let grant = Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
            effect,
        };

        for (field, value) in [
            ("subject", grant.subject.as_str()),
            ("domain", grant.domain.as_str()),
            ("object", grant.object.as_str()),
            ("action", grant.action.as_str()),
        ] {
            if !is_valid_field(value) {
                return Err(PolicyError::InvalidTuple(format!(
                    "grant {} '{}' is empty or contains a separator",
                    field, value
                )));
            }
        }

        Ok(grant)
    }

    /// Grant `permission` to `role` within `domain`.
    pub fn for_permission(
        role: &RoleId,
        domain: &DomainId,
        permission: &Permission,
    ) -> Result<Self, PolicyError> {
        Self::allow(
            role.as_str(),
            domain.clone(),
            permission.resource.as_str(),
            permission.action.as_str(),
        )
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Does this grant cover the request, given one candidate subject?
    pub fn matches(&self, subject: &str, domain: &DomainId, object: &str, action: &str) -> bool {
        field_matches(&self.subject, subject)
            && field_matches(self.domain.as_str(), domain.as_str())
            && field_matches(&self.object, object)
            && field_matches(&self.action, action)
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.subject, self.domain, self.object, self.action
        )?;
        if self.effect == Effect::Deny {
            write!(f, ", deny")?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role assignment
// ═══════════════════════════════════════════════════════════════════════════════

/// A user holds a role within a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user: UserId,
    pub role: RoleId,
    pub domain: DomainId,
}

impl RoleAssignment {
    pub fn new(user: impl Into<UserId>, role: impl Into<RoleId>, domain: impl Into<DomainId>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for RoleAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.user, self.role, self.domain)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal and target
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated identity of one request. Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    /// Tenant the user belongs to.
    pub owner: DomainId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Roles as reported by the directory at authentication time.
    pub roles: Vec<RoleId>,
}

impl Principal {
    pub fn new(user_id: impl Into<UserId>, owner: impl Into<DomainId>) -> Self {
        Self {
            user_id: user_id.into(),
            owner: owner.into(),
            email: None,
            display_name: None,
            roles: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleId>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// The principal's own user record as an enforcement target.
    pub fn as_object(&self) -> Target {
        Target::record("users", self.owner.clone(), self.user_id.clone())
    }
}

/// What a request acts on.
///
/// `object` is matched against grants. `owner` and `name` identify a single
/// user record and drive the self-access rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub object: String,
    pub owner: Option<DomainId>,
    pub name: Option<UserId>,
}

impl Target {
    pub fn resource(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            owner: None,
            name: None,
        }
    }

    pub fn record(
        object: impl Into<String>,
        owner: impl Into<DomainId>,
        name: impl Into<UserId>,
    ) -> Self {
        Self {
            object: object.into(),
            owner: Some(owner.into()),
            name: Some(name.into()),
        }
    }

    /// True when the target is the principal's own user record.
    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        match (&self.owner, &self.name) {
            (Some(owner), Some(name)) => *owner == principal.owner && *name == principal.user_id,
            _ => false,
        }
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

pub(crate) fn is_valid_field(value: &str) -> bool {
    !value.is_empty() && !value.contains([',', '\n', '\r'])
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse() {
        let p = Permission::parse("users:read").unwrap();
        assert_eq!(p.resource, "users");
        assert_eq!(p.action, "read");
        assert_eq!(p.to_string(), "users:read");

        assert!(Permission::parse("nocolon").is_none());
        assert!(Permission::parse(":read").is_none());
        assert!(Permission::parse("users:").is_none());
        assert!(Permission::parse("users:re,ad").is_none());
    }

    #[test]
    fn test_grant_rejects_bad_fields() {
        assert!(Grant::allow("admin", "acme", "users", "read").is_ok());
        assert!(Grant::allow("", "acme", "users", "read").is_err());
        assert!(Grant::allow("admin", "acme", "us,ers", "read").is_err());
        assert!(Grant::deny("admin", "acme", "users", "re\nad").is_err());
    }

    #[test]
    fn test_grant_wildcards() {
        let grant = Grant::allow("admin", DomainId::any(), "*", "read").unwrap();
        let acme = DomainId::new("acme");
        assert!(grant.matches("admin", &acme, "users", "read"));
        assert!(grant.matches("admin", &acme, "roles", "read"));
        assert!(!grant.matches("admin", &acme, "roles", "write"));
        assert!(!grant.matches("manager", &acme, "roles", "read"));
    }

    #[test]
    fn test_grant_display() {
        let grant = Grant::allow("admin", "acme", "users", "read").unwrap();
        assert_eq!(grant.to_string(), "admin, acme, users, read");
        let deny = Grant::deny("bob", "acme", "users", "delete").unwrap();
        assert_eq!(deny.to_string(), "bob, acme, users, delete, deny");
    }

    #[test]
    fn test_target_ownership() {
        let alice = Principal::new("alice", "acme");
        assert!(alice.as_object().is_owned_by(&alice));
        assert!(!Target::record("users", "acme", "bob").is_owned_by(&alice));
        assert!(!Target::record("users", "other", "alice").is_owned_by(&alice));
        assert!(!Target::resource("users").is_owned_by(&alice));
    }
}
