//! Reference [`PolicyGate`] implementation: an in-memory, specificity-ordered
//! rule table.
//!
//! Evaluation order mirrors the host codebase's permission engine — match by
//! specificity tier, most restrictive decision wins at a tie — with one
//! deliberate divergence: the host defaults an unmatched request to `Confirm`
//! (ask a human); there is no human in the loop here, so an unmatched request
//! defaults to deny. See DESIGN.md.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use scheduler_kernel::{PolicyAction, PolicyGate, Principal, ResourceDescriptor};

use crate::error::{PolicyError, Result};
use crate::rule::{Rule, Scope};

/// Rule-table-backed `PolicyGate`. Cheaply cloneable; the table is shared via
/// `Arc` so clones observe each other's mutations.
#[derive(Clone)]
pub struct RuleBasedPolicyGate {
    rules: Arc<DashMap<u64, Rule>>,
    next_id: Arc<AtomicU64>,
}

impl Default for RuleBasedPolicyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedPolicyGate {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Adds a rule and returns its id (for later `remove_rule`).
    pub fn add_rule(
        &self,
        role: impl Into<String>,
        action: PolicyAction,
        resource_pattern: impl Into<String>,
        scope: Scope,
        allow: bool,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rules.insert(
            id,
            Rule {
                id,
                role: role.into(),
                action,
                resource_pattern: resource_pattern.into(),
                scope,
                allow,
            },
        );
        id
    }

    pub fn remove_rule(&self, id: u64) -> Result<()> {
        self.rules
            .remove(&id)
            .map(|_| ())
            .ok_or(PolicyError::RuleNotFound(id))
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|r| r.value().clone()).collect()
    }

    /// A gate seeded with the sensible defaults for a fresh scheduler: any
    /// authenticated role may submit and view, and may cancel its own tasks.
    /// Admin-role principals may cancel anything. Nothing else is granted.
    pub fn with_defaults() -> Self {
        let gate = Self::new();
        gate.add_rule("*", PolicyAction::Submit, "*", Scope::Any, true);
        gate.add_rule("*", PolicyAction::View, "*", Scope::Any, true);
        gate.add_rule("*", PolicyAction::Cancel, "*", Scope::Own, true);
        gate.add_rule("admin", PolicyAction::Cancel, "*", Scope::Any, true);
        gate
    }
}

#[async_trait]
impl PolicyGate for RuleBasedPolicyGate {
    async fn authorize(
        &self,
        principal: &Principal,
        action: PolicyAction,
        resource: ResourceDescriptor<'_>,
    ) -> bool {
        let matching: Vec<Rule> = self
            .rules
            .iter()
            .map(|r| r.value().clone())
            .filter(|r| r.matches(principal, action, resource))
            .collect();

        if matching.is_empty() {
            tracing::debug!(
                user_id = %principal.user_id,
                action = ?action,
                task_type = resource.task_type,
                "no matching policy rule, defaulting to deny"
            );
            return false;
        }

        let best_specificity = matching.iter().map(Rule::specificity).min().unwrap();
        // Most restrictive (deny) wins among rules tied for most specific.
        let decision = matching
            .iter()
            .filter(|r| r.specificity() == best_specificity)
            .any(|r| !r.allow)
            .then_some(false)
            .unwrap_or(true);

        tracing::debug!(
            user_id = %principal.user_id,
            action = ?action,
            task_type = resource.task_type,
            decision,
            matched_rules = matching.len(),
            "policy evaluated"
        );
        decision
    }
}
