//! In-memory policy store with atomically swapped snapshots.
//!
//! Readers call [`PolicyStore::snapshot`] and evaluate against the returned
//! `Arc<PolicySnapshot>`; they never block and never observe a half-built
//! policy. Writers build a complete new snapshot off to the side, then swap
//! the pointer. A writer mutex serializes copy-on-write updates so that two
//! concurrent `add_grant` calls cannot lose each other's grant.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{DomainId, Effect, Grant, RoleAssignment, RoleId, UserId};
use super::policy::PolicyError;

// ═══════════════════════════════════════════════════════════════════════════════
// Policy set
// ═══════════════════════════════════════════════════════════════════════════════

/// The raw material for a snapshot: grants, assignments and the role
/// catalogue they were resolved against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    pub roles: BTreeSet<RoleId>,
    pub grants: Vec<Grant>,
    pub assignments: Vec<RoleAssignment>,
}

impl PolicySet {
    /// Build a set whose role catalogue is every role named by an assignment.
    pub fn new(grants: Vec<Grant>, assignments: Vec<RoleAssignment>) -> Self {
        let roles = assignments.iter().map(|a| a.role.clone()).collect();
        Self {
            roles,
            grants,
            assignments,
        }
    }

    /// Replace the derived catalogue with the roles known to the directory.
    pub fn with_roles<I>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = RoleId>,
    {
        self.roles = roles.into_iter().collect();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// An immutable, internally consistent version of the policy.
#[derive(Debug)]
pub struct PolicySnapshot {
    version: u64,
    grants: Vec<Grant>,
    assignments: Vec<RoleAssignment>,
    roles: BTreeSet<RoleId>,
    index: HashMap<(UserId, DomainId), Vec<RoleId>>,
    fingerprint: String,
    installed_at: DateTime<Utc>,
}

impl PolicySnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            grants: Vec::new(),
            assignments: Vec::new(),
            roles: BTreeSet::new(),
            index: HashMap::new(),
            fingerprint: fingerprint(&[], &[]),
            installed_at: Utc::now(),
        }
    }

    fn build(version: u64, set: PolicySet) -> Result<Self, PolicyError> {
        let PolicySet {
            roles,
            grants,
            assignments,
        } = set;

        let mut index: HashMap<(UserId, DomainId), Vec<RoleId>> = HashMap::new();
        index
            .try_reserve(assignments.len())
            .map_err(|e| PolicyError::ResourceExhausted(e.to_string()))?;

        for assignment in &assignments {
            if !roles.contains(&assignment.role) {
                return Err(PolicyError::Corrupt(format!(
                    "assignment '{}' names a role outside the catalogue",
                    assignment
                )));
            }
            let held = index
                .entry((assignment.user.clone(), assignment.domain.clone()))
                .or_default();
            if !held.contains(&assignment.role) {
                held.push(assignment.role.clone());
            }
        }

        Ok(Self {
            version,
            fingerprint: fingerprint(&grants, &assignments),
            grants,
            assignments,
            roles,
            index,
            installed_at: Utc::now(),
        })
    }

    /// Monotonic counter, bumped by every install.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    pub fn assignments(&self) -> &[RoleAssignment] {
        &self.assignments
    }

    /// Roles known when this snapshot was built.
    pub fn roles(&self) -> &BTreeSet<RoleId> {
        &self.roles
    }

    /// SHA-256 over the sorted tuples; equal content yields equal fingerprints
    /// regardless of insertion order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn installed_at(&self) -> DateTime<Utc> {
        self.installed_at
    }

    /// Roles the user holds in `domain`.
    pub fn roles_of_user(&self, user: &UserId, domain: &DomainId) -> &[RoleId] {
        self.index
            .get(&(user.clone(), domain.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Exact-match lookup of an allow grant.
    pub fn has_grant(&self, subject: &str, domain: &DomainId, object: &str, action: &str) -> bool {
        self.grants.iter().any(|g| {
            g.effect() == Effect::Allow
                && g.subject() == subject
                && g.domain() == domain
                && g.object() == object
                && g.action() == action
        })
    }

    fn to_set(&self) -> PolicySet {
        PolicySet {
            roles: self.roles.clone(),
            grants: self.grants.clone(),
            assignments: self.assignments.clone(),
        }
    }
}

fn fingerprint(grants: &[Grant], assignments: &[RoleAssignment]) -> String {
    let mut grant_rows: Vec<String> = grants.iter().map(|g| format!("p, {}", g)).collect();
    let mut assignment_rows: Vec<String> =
        assignments.iter().map(|a| format!("g, {}", a)).collect();
    grant_rows.sort_unstable();
    assignment_rows.sort_unstable();

    let mut hasher = Sha256::new();
    for row in grant_rows.iter().chain(assignment_rows.iter()) {
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared policy store. Cheap to read from many tasks at once.
#[derive(Debug)]
pub struct PolicyStore {
    current: ArcSwap<PolicySnapshot>,
    writer: Mutex<()>,
}

impl PolicyStore {
    /// Create an empty store. Every decision against it denies.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySnapshot::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Create a store pre-populated with `set`.
    pub fn with_policy(set: PolicySet) -> Result<Self, PolicyError> {
        let store = Self::new();
        store.replace_all(set)?;
        Ok(store)
    }

    /// The snapshot to evaluate against. Hold on to it for the duration of
    /// one decision.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Discard the current policy and install `set` in a single swap.
    ///
    /// On error the previous snapshot stays in place.
    pub fn replace_all(&self, set: PolicySet) -> Result<Arc<PolicySnapshot>, PolicyError> {
        let _guard = self.writer.lock();
        let version = self.current.load().version + 1;
        let snapshot = Arc::new(PolicySnapshot::build(version, set)?);
        self.current.store(Arc::clone(&snapshot));

        info!(
            version,
            grants = snapshot.grants.len(),
            assignments = snapshot.assignments.len(),
            fingerprint = %snapshot.fingerprint,
            "Policy snapshot installed"
        );
        crate::observability::metrics::record_policy_size(
            snapshot.grants.len(),
            snapshot.assignments.len(),
        );
        Ok(snapshot)
    }

    /// Append one grant by copying the current snapshot. Duplicates are kept.
    pub fn add_grant(&self, grant: Grant) -> Result<Arc<PolicySnapshot>, PolicyError> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();

        let mut set = current.to_set();
        set.grants
            .try_reserve(1)
            .map_err(|e| PolicyError::ResourceExhausted(e.to_string()))?;
        debug!(grant = %grant, "Adding grant");
        set.grants.push(grant);

        let snapshot = Arc::new(PolicySnapshot::build(current.version + 1, set)?);
        self.current.store(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn has_grant(&self, subject: &str, domain: &DomainId, object: &str, action: &str) -> bool {
        self.current
            .load()
            .has_grant(subject, domain, object, action)
    }

    pub fn roles_of_user(&self, user: &UserId, domain: &DomainId) -> Vec<RoleId> {
        self.current.load().roles_of_user(user, domain).to_vec()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
