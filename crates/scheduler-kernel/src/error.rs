//! Error taxonomy for the scheduler core.

use uuid::Uuid;

/// Errors surfaced by [`crate::store::TaskStore`] and [`crate::scheduler::Scheduler`].
/// `WorkerRegistry` itself never errors: an unknown worker id is always a silent
/// no-op (see `registry.rs`), matching the "evicted worker is simply gone" model.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // --- TaskStore errors -------------------------------------------------
    /// `insert` called with an id already present in the store.
    #[error("task {0} already exists")]
    TaskAlreadyExists(Uuid),

    /// A task lookup (`get`, `mark_assigned`, `requeue`, ...) found no such id.
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    /// `record_completion` called a second time for a task that already has a result.
    #[error("task {0} already completed")]
    AlreadyCompleted(Uuid),

    /// `mark_assigned` called with a worker id different from the task's current assignment.
    #[error("task {0} is already assigned to a different worker")]
    InvalidReassignment(Uuid),

    // --- Authorization errors (surfaced across the scheduler boundary) ------
    /// The submitting/cancelling principal failed validity checks (empty id or expired token).
    #[error("invalid principal")]
    InvalidPrincipal,

    /// The PolicyGate denied the requested action.
    #[error("unauthorized")]
    Unauthorized,

    /// Catch-all for conditions that should not occur under correct usage.
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, KernelError>;
