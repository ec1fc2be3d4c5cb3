//! In-process directory for tests and local development.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::models::{DirectoryRole, DirectoryUser, OAuthToken};
use super::{DirectoryError, IdentityDirectory};

/// Directory held in memory. Failure switches and an artificial latency let
/// tests exercise outage paths.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<BTreeMap<String, DirectoryUser>>,
    roles: RwLock<BTreeMap<String, DirectoryRole>>,
    fail_users: AtomicBool,
    fail_roles: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(self, role: DirectoryRole) -> Self {
        self.roles.write().insert(role.name.clone(), role);
        self
    }

    pub fn with_user(self, user: DirectoryUser) -> Self {
        self.users.write().insert(user.name.clone(), user);
        self
    }

    /// Make `get_users` fail until reset.
    pub fn fail_users(&self, fail: bool) {
        self.fail_users.store(fail, Ordering::SeqCst);
    }

    /// Make `get_roles` fail until reset.
    pub fn fail_roles(&self, fail: bool) {
        self.fail_roles.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn outage(what: &str) -> DirectoryError {
        DirectoryError::Decode(format!("simulated outage fetching {}", what))
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn get_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError> {
        self.simulate_latency().await;
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err(Self::outage("roles"));
        }
        Ok(self.roles.read().values().cloned().collect())
    }

    async fn get_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.simulate_latency().await;
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(Self::outage("users"));
        }
        Ok(self.users.read().values().cloned().collect())
    }

    async fn get_user(&self, name: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.simulate_latency().await;
        if self.fail_users.load(Ordering::SeqCst) {
            return Err(Self::outage("user"));
        }
        Ok(self.users.read().get(name).cloned())
    }

    async fn add_user(&self, user: DirectoryUser) -> Result<(), DirectoryError> {
        let mut users = self.users.write();
        if users.contains_key(&user.name) {
            return Err(DirectoryError::Rejected(format!(
                "user '{}' already exists",
                user.name
            )));
        }
        users.insert(user.name.clone(), user);
        Ok(())
    }

    async fn update_user(&self, user: DirectoryUser) -> Result<(), DirectoryError> {
        let mut users = self.users.write();
        match users.get_mut(&user.name) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(DirectoryError::NotFound(format!("user '{}'", user.name))),
        }
    }

    async fn delete_user(&self, name: &str) -> Result<(), DirectoryError> {
        self.users
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(format!("user '{}'", name)))
    }

    async fn add_role(&self, role: DirectoryRole) -> Result<(), DirectoryError> {
        let mut roles = self.roles.write();
        if roles.contains_key(&role.name) {
            return Err(DirectoryError::Rejected(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        roles.insert(role.name.clone(), role);
        Ok(())
    }

    async fn update_role(&self, role: DirectoryRole) -> Result<(), DirectoryError> {
        let mut roles = self.roles.write();
        match roles.get_mut(&role.name) {
            Some(existing) => {
                *existing = role;
                Ok(())
            }
            None => Err(DirectoryError::NotFound(format!("role '{}'", role.name))),
        }
    }

    async fn delete_role(&self, name: &str) -> Result<(), DirectoryError> {
        self.roles
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(format!("role '{}'", name)))
    }

    fn signin_url(&self, redirect_url: &str) -> Result<String, DirectoryError> {
        Ok(format!("memory://login?redirect_uri={}", redirect_url))
    }

    async fn exchange_code(&self, _code: &str, _state: &str) -> Result<OAuthToken, DirectoryError> {
        Err(DirectoryError::Unsupported("oauth code exchange"))
    }
}
