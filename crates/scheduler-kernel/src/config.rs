//! Ambient configuration surface: tunables for the control loops and worker
//! runtime defaults, overridable from TOML without recompiling.
//!
//! Deliberately smaller than the host codebase's file-watching `ConfigManager`
//! (no hot reload, no `notify` watcher) — dynamic config reload is an
//! operational/CLI concern out of scope for the scheduler core itself (see
//! DESIGN.md); this is just the `Default` + TOML-load half of that pattern.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Placement tick period, in milliseconds (~100 ms per the design).
    pub placement_tick_ms: u64,
    /// Heartbeat audit period, in milliseconds (~1 s per the design).
    pub heartbeat_audit_ms: u64,
    /// Heartbeat age beyond which a worker is presumed failed.
    pub worker_staleness_secs: i64,
    /// Default per-worker concurrency if a worker does not specify its own.
    pub default_max_concurrency: u32,
    /// Worker status-sampler period, in milliseconds (~500 ms per the design).
    pub status_sampler_ms: u64,
    /// Worker heartbeat-emitter period, in milliseconds (~1 s per the design).
    pub heartbeat_emitter_ms: u64,
    /// Event bus broadcast channel capacity.
    pub event_bus_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            placement_tick_ms: 100,
            heartbeat_audit_ms: 1_000,
            worker_staleness_secs: 5,
            default_max_concurrency: 4,
            status_sampler_ms: 500,
            heartbeat_emitter_ms: 1_000,
            event_bus_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| KernelError::Internal(format!("invalid scheduler config: {e}")))
    }

    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Internal(format!("failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }
}
