//! Error taxonomy for the worker runtime.

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// `WorkerRuntime::new` called with `max_concurrency == 0`.
    #[error("max_concurrency must be greater than zero")]
    InvalidConcurrency,
}

pub type Result<T> = std::result::Result<T, WorkerError>;
