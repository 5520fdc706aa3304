//! Error taxonomy for the rule-based `PolicyGate` implementation.

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// `remove_rule` called with an id that does not exist.
    #[error("rule {0} not found")]
    RuleNotFound(u64),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
