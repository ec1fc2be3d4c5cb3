//! Policy engine for evaluating authorization decisions.
//!
//! The policy engine answers the question:
//! "Can principal P perform action A on object O within domain D?"
//!
//! Evaluation has two stages, both against one snapshot of the store:
//! 1. Collect the subject set: every role the principal holds in the domain,
//!    plus the principal's own user name.
//! 2. Scan the grants. Any matching deny wins; otherwise any matching allow
//!    permits. No match denies.
//!
//! Independently of grants, a principal may always act on its own user record.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use super::models::{DomainId, Effect, Permission, Principal, Target};
use super::store::{PolicySnapshot, PolicyStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors from the policy store and engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid policy tuple: {0}")]
    InvalidTuple(String),

    #[error("Policy store corrupt: {0}")]
    Corrupt(String),

    #[error("Resource exhausted while building policy: {0}")]
    ResourceExhausted(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The action is allowed.
    Allow,
    /// The action is denied, with a reason.
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(_) => "deny",
        }
    }
}

/// Outcome of one object evaluation. `Forbidden` is final; `Unmatched`
/// may still be overturned by another name for the same object.
enum Verdict {
    Allow,
    Forbidden(String),
    Unmatched(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Policy Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates requests against the current [`PolicyStore`] snapshot.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
}

impl PolicyEngine {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Decide whether `principal` may perform `action` on `target` in `domain`.
    pub fn decide(
        &self,
        principal: &Principal,
        domain: &DomainId,
        target: &Target,
        action: &str,
    ) -> PolicyDecision {
        let snapshot = self.store.snapshot();
        let decision = Self::decide_with(&snapshot, principal, domain, target, action);

        debug!(
            user = %principal.user_id,
            domain = %domain,
            object = %target.object,
            action,
            version = snapshot.version(),
            allowed = decision.is_allowed(),
            "Policy decision"
        );
        crate::observability::metrics::record_decision(decision.label());
        decision
    }

    /// Decide over several names for the same request object, for example
    /// a concrete path and the route template it matched. One snapshot is
    /// read. An explicit deny on any name wins; otherwise one allow suffices.
    pub fn decide_any(
        &self,
        principal: &Principal,
        domain: &DomainId,
        targets: &[Target],
        action: &str,
    ) -> PolicyDecision {
        let snapshot = self.store.snapshot();
        let mut decision = PolicyDecision::Deny("no object to evaluate".to_string());
        for target in targets {
            match Self::evaluate(&snapshot, principal, domain, target, action) {
                Verdict::Allow => decision = PolicyDecision::Allow,
                Verdict::Forbidden(reason) => {
                    decision = PolicyDecision::Deny(reason);
                    break;
                }
                Verdict::Unmatched(reason) => {
                    if decision.is_denied() {
                        decision = PolicyDecision::Deny(reason);
                    }
                }
            }
        }

        debug!(
            user = %principal.user_id,
            domain = %domain,
            objects = targets.len(),
            action,
            version = snapshot.version(),
            allowed = decision.is_allowed(),
            "Policy decision"
        );
        crate::observability::metrics::record_decision(decision.label());
        decision
    }

    /// Decide against an explicit snapshot.
    pub fn decide_with(
        snapshot: &PolicySnapshot,
        principal: &Principal,
        domain: &DomainId,
        target: &Target,
        action: &str,
    ) -> PolicyDecision {
        match Self::evaluate(snapshot, principal, domain, target, action) {
            Verdict::Allow => PolicyDecision::Allow,
            Verdict::Forbidden(reason) | Verdict::Unmatched(reason) => PolicyDecision::Deny(reason),
        }
    }

    fn evaluate(
        snapshot: &PolicySnapshot,
        principal: &Principal,
        domain: &DomainId,
        target: &Target,
        action: &str,
    ) -> Verdict {
        if target.is_owned_by(principal) {
            return Verdict::Allow;
        }

        if !domain.is_wildcard() && principal.owner != *domain {
            return Verdict::Forbidden(format!(
                "principal '{}' belongs to '{}', not '{}'",
                principal.user_id, principal.owner, domain
            ));
        }

        // Stage 1: subject set.
        let roles = snapshot.roles_of_user(&principal.user_id, domain);
        if let Some(missing) = roles.iter().find(|r| !snapshot.roles().contains(*r)) {
            error!(
                user = %principal.user_id,
                role = %missing,
                version = snapshot.version(),
                "Policy store corrupt: assigned role missing from catalogue"
            );
            return Verdict::Forbidden("policy store corrupt".to_string());
        }

        let subjects = roles
            .iter()
            .map(|r| r.as_str())
            .chain(std::iter::once(principal.user_id.as_str()));

        // Stage 2: grant scan.
        let mut allowed = false;
        for subject in subjects {
            for grant in snapshot.grants() {
                if !grant.matches(subject, domain, &target.object, action) {
                    continue;
                }
                match grant.effect() {
                    Effect::Deny => {
                        return Verdict::Forbidden(format!(
                            "explicitly denied by grant '{}'",
                            grant
                        ));
                    }
                    Effect::Allow => allowed = true,
                }
            }
        }

        if allowed {
            Verdict::Allow
        } else {
            Verdict::Unmatched(format!(
                "no grant allows '{}' on '{}' for '{}' in '{}'",
                action, target.object, principal.user_id, domain
            ))
        }
    }

    /// Check a `resource:action` permission in the principal's own domain.
    pub fn check(&self, principal: &Principal, permission: &Permission) -> PolicyDecision {
        self.decide(
            principal,
            &principal.owner,
            &Target::resource(permission.resource.as_str()),
            &permission.action,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
