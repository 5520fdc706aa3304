//! Rule type and the specificity-ordered matching used to evaluate it.
//!
//! Mirrors the host codebase's policy-resolution order (exact resource beats
//! wildcard resource, exact role beats wildcard role) but adds a `scope`
//! dimension the host never needed: `Own` narrows a rule to resources the
//! principal itself submitted, which is how `cancel_task:own` gets to mean
//! something instead of always granting the action.

use scheduler_kernel::{PolicyAction, Principal, ResourceDescriptor};
use serde::{Deserialize, Serialize};

/// `Any` matches every resource regardless of submitter; `Own` additionally
/// requires `resource.submitted_by == principal.user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Any,
    Own,
}

/// A single authorization rule: "principals with `role` may (or may not)
/// perform `action` against tasks matching `resource_pattern`, within `scope`."
///
/// `role` and `resource_pattern` may be `"*"` to match anything. Serializable so a
/// rule table can be loaded from or dumped to a config file the same way
/// `SchedulerConfig` is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    pub role: String,
    pub action: PolicyAction,
    pub resource_pattern: String,
    pub scope: Scope,
    pub allow: bool,
}

impl Rule {
    /// Whether `principal`/`action`/`resource` satisfy this rule's matching
    /// criteria (role, action, resource pattern, and scope) — not whether it
    /// grants or denies; that's `self.allow`.
    pub fn matches(&self, principal: &Principal, action: PolicyAction, resource: ResourceDescriptor<'_>) -> bool {
        if self.action != action {
            return false;
        }
        let role_matches = self.role == "*" || principal.has_role(&self.role);
        if !role_matches {
            return false;
        }
        let resource_matches = self.resource_pattern == "*" || self.resource_pattern == resource.task_type;
        if !resource_matches {
            return false;
        }
        match self.scope {
            Scope::Any => true,
            Scope::Own => resource.submitted_by == principal.user_id,
        }
    }

    /// Lower is more specific. Exact role and exact resource each count as
    /// more specific than their wildcard counterpart; `Own` is more specific
    /// than `Any` since it further narrows the match.
    pub fn specificity(&self) -> u8 {
        let role_bits = if self.role == "*" { 1 } else { 0 };
        let resource_bits = if self.resource_pattern == "*" { 1 } else { 0 };
        let scope_bits = if self.scope == Scope::Any { 1 } else { 0 };
        role_bits + resource_bits + scope_bits
    }
}
