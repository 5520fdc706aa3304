//! Per-worker tunables: retry/backoff/timeout for task execution, and the
//! status-sampler/heartbeat-emitter periods.
//!
//! Mirrors the host codebase's `ExecutorConfig` (max retries, exponential
//! backoff, execution timeout) plus the two periods the worker runtime adds.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum retry attempts per task (0 = no retries).
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub retry_backoff_factor: f64,
    pub max_retry_delay: Duration,
    pub execution_timeout: Duration,
    /// Status sampler period (~500 ms per the design).
    pub status_sampler_ms: u64,
    /// Heartbeat emitter period (~1 s per the design).
    pub heartbeat_emitter_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(500),
            retry_backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(30),
            status_sampler_ms: 500,
            heartbeat_emitter_ms: 1_000,
        }
    }
}
