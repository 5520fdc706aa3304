//! Worker runtime: executes tasks handed to it by the scheduler core,
//! bounded by a per-worker concurrency budget, converting every failure mode
//! into a typed [`TaskResult`] rather than letting it escape.

pub mod config;
pub mod error;
pub mod sink;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use sink::CompletionSink;
pub use worker::{TaskHandler, WorkerRuntime};
