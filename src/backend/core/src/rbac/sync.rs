//! Directory → policy store synchronization.
//!
//! A sync fetches every role and user from the directory, maps the tenant's
//! roles through the permission templates, records one assignment per
//! (user, role) pair and installs the result with a single
//! [`PolicyStore::replace_all`]. If any fetch fails the store keeps its
//! previous snapshot.
//!
//! Only one sync runs at a time. A request that arrives while a sync is in
//! flight gets [`SyncError::AlreadyInProgress`] instead of queueing.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::models::{DomainId, Grant, RoleAssignment, RoleId, UserId};
use super::persist::PolicyFile;
use super::policy::PolicyError;
use super::roles::PermissionTemplates;
use super::store::{PolicySet, PolicyStore};
use crate::directory::{DirectoryError, DirectoryRole, DirectoryUser, IdentityDirectory};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A policy sync is already in progress")]
    AlreadyInProgress,

    #[error("Directory unavailable while fetching {what}: {source}")]
    DirectoryUnavailable {
        what: &'static str,
        #[source]
        source: DirectoryError,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Sync task aborted: {0}")]
    Aborted(String),
}

/// Outcome of one completed sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub grants: usize,
    pub assignments: usize,
    /// Tenant roles with no permission template.
    pub skipped_roles: Vec<String>,
    /// Assignments dropped because the role is not in the directory.
    pub dropped_assignments: usize,
    pub fingerprint: String,
    pub version: u64,
    pub persisted: bool,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Counters gathered while mapping directory records to policy tuples.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MappingStats {
    pub skipped_roles: Vec<String>,
    pub dropped_assignments: usize,
}

/// Map directory records into a policy set for `domain`. Pure.
pub fn build_policy(
    domain: &DomainId,
    templates: &PermissionTemplates,
    roles: &[DirectoryRole],
    users: &[DirectoryUser],
) -> Result<(PolicySet, MappingStats), PolicyError> {
    let mut stats = MappingStats::default();

    let catalogue: BTreeSet<RoleId> = roles
        .iter()
        .filter(|r| r.is_owned_by(domain))
        .map(DirectoryRole::role_id)
        .collect();

    let mut grants = Vec::new();
    for role in &catalogue {
        match templates.permissions_for(role) {
            Some(permissions) => {
                for permission in permissions {
                    grants.push(Grant::for_permission(role, domain, permission)?);
                }
            }
            None => {
                warn!(role = %role, domain = %domain, "No permission template for role, skipping");
                stats.skipped_roles.push(role.to_string());
            }
        }
    }

    let mut assignments = Vec::new();
    for user in users.iter().filter(|u| u.is_owned_by(domain)) {
        for role in &user.roles {
            let role_id = role.role_id();
            if !catalogue.contains(&role_id) {
                warn!(
                    user = %user.name,
                    role = %role_id,
                    "User holds a role unknown to the directory, dropping assignment"
                );
                stats.dropped_assignments += 1;
                continue;
            }
            assignments.push(RoleAssignment::new(
                UserId::new(user.name.as_str()),
                role_id,
                domain.clone(),
            ));
        }
    }

    let set = PolicySet::new(grants, assignments).with_roles(catalogue);
    Ok((set, stats))
}

/// Rebuilds the policy store from the identity directory.
pub struct DirectorySync {
    directory: Arc<dyn IdentityDirectory>,
    store: Arc<PolicyStore>,
    templates: PermissionTemplates,
    domain: DomainId,
    timeout: Duration,
    policy_file: Option<PolicyFile>,
    running: Arc<Mutex<()>>,
    last_report: RwLock<Option<SyncReport>>,
}

impl DirectorySync {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        store: Arc<PolicyStore>,
        domain: DomainId,
    ) -> Self {
        Self {
            directory,
            store,
            templates: PermissionTemplates::defaults(),
            domain,
            timeout: Duration::from_secs(10),
            policy_file: None,
            running: Arc::new(Mutex::new(())),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_templates(mut self, templates: PermissionTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Bound on each directory fetch.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy_file(mut self, file: PolicyFile) -> Self {
        self.policy_file = Some(file);
        self
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// The most recent successful sync, if any.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run a sync on the current task.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let guard = self.acquire()?;
        self.run(guard).await
    }

    /// Run a sync on its own task so that dropping the caller (for example a
    /// disconnected HTTP client) does not cancel it halfway.
    pub async fn trigger(self: &Arc<Self>) -> Result<SyncReport, SyncError> {
        let guard = self.acquire()?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(guard).await })
            .await
            .map_err(|e| SyncError::Aborted(e.to_string()))?
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<()>, SyncError> {
        Arc::clone(&self.running).try_lock_owned().map_err(|_| {
            warn!("Policy sync requested while another sync is running");
            metrics::record_sync("rejected", Duration::ZERO);
            SyncError::AlreadyInProgress
        })
    }

    async fn run(&self, _guard: OwnedMutexGuard<()>) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        info!(domain = %self.domain, "Starting policy sync from directory");

        let result = self.rebuild(started).await;
        match &result {
            Ok(report) => {
                metrics::record_sync("success", started.elapsed());
                info!(
                    grants = report.grants,
                    assignments = report.assignments,
                    skipped_roles = report.skipped_roles.len(),
                    dropped_assignments = report.dropped_assignments,
                    fingerprint = %report.fingerprint,
                    duration_ms = report.duration_ms,
                    "Policy sync complete"
                );
                *self.last_report.write() = Some(report.clone());
            }
            Err(e) => {
                metrics::record_sync("failure", started.elapsed());
                error!(error = %e, "Policy sync failed, keeping previous snapshot");
            }
        }
        result
    }

    async fn rebuild(&self, started: Instant) -> Result<SyncReport, SyncError> {
        let roles = self.fetch("roles", self.directory.get_roles()).await?;
        let users = self.fetch("users", self.directory.get_users()).await?;

        let (set, stats) = build_policy(&self.domain, &self.templates, &roles, &users)?;
        let snapshot = self.store.replace_all(set)?;

        let persisted = match &self.policy_file {
            Some(file) => match file.save(&snapshot).await {
                Ok(()) => true,
                Err(e) => {
                    error!(path = %file.path().display(), error = %e, "Failed to write policy file");
                    false
                }
            },
            None => false,
        };

        Ok(SyncReport {
            grants: snapshot.grants().len(),
            assignments: snapshot.assignments().len(),
            skipped_roles: stats.skipped_roles,
            dropped_assignments: stats.dropped_assignments,
            fingerprint: snapshot.fingerprint().to_string(),
            version: snapshot.version(),
            persisted,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        })
    }

    async fn fetch<T, F>(&self, what: &'static str, call: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(SyncError::DirectoryUnavailable { what, source }),
            Err(_) => Err(SyncError::DirectoryUnavailable {
                what,
                source: DirectoryError::Timeout(self.timeout),
            }),
        }
    }
}

impl std::fmt::Debug for DirectorySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySync")
            .field("domain", &self.domain)
            .field("timeout", &self.timeout)
            .field("policy_file", &self.policy_file)
            .finish_non_exhaustive()
    }
}
