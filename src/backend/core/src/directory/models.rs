//! Records exchanged with the identity directory.
//!
//! Field names follow the directory's camelCase JSON. Unknown fields are
//! ignored and missing optional fields default, since directory versions
//! differ in what they return.

use serde::{Deserialize, Serialize};

use crate::rbac::models::{DomainId, RoleId};

/// A role as stored in the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryRole {
    pub owner: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_enabled: bool,
}

impl DirectoryRole {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            is_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn role_id(&self) -> RoleId {
        RoleId::new(self.name.as_str())
    }

    pub fn is_owned_by(&self, domain: &DomainId) -> bool {
        self.owner == domain.as_str()
    }
}

/// A user as stored in the directory, including the roles it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryUser {
    pub owner: String,
    pub name: String,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub roles: Vec<DirectoryRole>,
}

impl DirectoryUser {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_role(mut self, role: DirectoryRole) -> Self {
        self.roles.push(role);
        self
    }

    /// Directory id in `owner/name` form.
    pub fn id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn is_owned_by(&self, domain: &DomainId) -> bool {
        self.owner == domain.as_str()
    }

    pub fn role_ids(&self) -> Vec<RoleId> {
        self.roles.iter().map(DirectoryRole::role_id).collect()
    }

    pub fn holds_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.name == role)
    }
}

/// Token returned by the directory's OAuth code exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_directory_json() {
        let raw = r#"{
            "owner": "acme",
            "name": "alice",
            "displayName": "Alice",
            "email": "alice@acme.test",
            "createdTime": "2024-01-01T00:00:00Z",
            "roles": [{"owner": "acme", "name": "admin", "displayName": "Admin"}]
        }"#;
        let user: DirectoryUser = serde_json::from_str(raw).unwrap();
        assert_eq!(user.id(), "acme/alice");
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.role_ids(), vec![RoleId::new("admin")]);
        assert!(user.is_owned_by(&DomainId::new("acme")));
    }

    #[test]
    fn test_null_roles() {
        let user: DirectoryUser =
            serde_json::from_str(r#"{"owner":"acme","name":"bob","roles":null}"#).unwrap();
        assert!(user.roles.is_empty());
        assert!(user.password.is_none());
    }
}
