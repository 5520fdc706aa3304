//! Reference `PolicyGate` implementation: an in-memory, specificity-ordered
//! rule table resolving submit/cancel/view authorization, including the
//! `cancel_task:own` ownership scoping the scheduler core leaves to its
//! implementors.

pub mod error;
pub mod gate;
pub mod rule;

pub use error::{PolicyError, Result};
pub use gate::RuleBasedPolicyGate;
pub use rule::{Rule, Scope};
