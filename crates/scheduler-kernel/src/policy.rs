//! PolicyGate: the authorization boundary contract.
//!
//! This module only defines the contract the Scheduler Core depends on — the
//! concrete evaluation algorithm (role/action/resource rules, specificity
//! ordering, ownership resolution) lives in the separate `scheduler-policy`
//! crate, which is a reference implementation, not the only legal one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Opaque-to-the-core authenticated caller. The core only ever inspects
/// `is_valid`; everything else is forwarded to the `PolicyGate` untouched.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
    pub token: String,
    pub token_expiry: DateTime<Utc>,
}

impl Principal {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.user_id.is_empty() && !self.token.is_empty() && self.token_expiry > now
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// The action a principal is attempting against the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PolicyAction {
    Submit,
    Cancel,
    View,
}

/// What the action targets. `submitted_by` is included so a `PolicyGate`
/// implementation can resolve ownership-scoped grants (e.g. "cancel your own
/// tasks") without the Scheduler Core having to understand policy semantics.
#[derive(Debug, Clone, Copy)]
pub struct ResourceDescriptor<'a> {
    pub task_type: &'a str,
    pub submitted_by: &'a str,
}

/// Binary authorization decision for submit/cancel/view actions.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn authorize(
        &self,
        principal: &Principal,
        action: PolicyAction,
        resource: ResourceDescriptor<'_>,
    ) -> bool;
}
