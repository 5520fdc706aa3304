//! WorkerRegistry: live workers, their last-known status, and last heartbeat.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::task::{NodeStatus, Task, TaskId};

/// The scheduler's capability to reach a worker, without owning it.
///
/// Per the unidirectional-ownership design (no cyclic worker↔scheduler references),
/// this is the only thing the registry keeps about a worker beyond its last status:
/// a callback surface, not a pointer into the worker's own state.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Whether the worker has been started and not yet stopped. Synchronous and
    /// cheap: backed by an atomic flag on the worker side, not a round trip.
    fn is_running(&self) -> bool;

    /// Offer a task to the worker. `false` means "try the next worker on the next tick".
    async fn accept_task(&self, task: Task) -> bool;

    /// Ask the worker to drop a task it may be holding. Returns whether it found it.
    async fn cancel(&self, task_id: TaskId) -> bool;
}

struct RegistryEntry {
    handle: Arc<dyn WorkerHandle>,
    max_concurrency: u32,
    status: NodeStatus,
}

/// Holds live workers, their last-known status, and their last heartbeat timestamp.
///
/// Invariant: for every id present there is exactly one handle and one last-known
/// status. `update_status` for an unknown id is dropped silently — the worker was
/// evicted and the stale status must not resurrect its registry entry.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<DashMap<String, RegistryEntry>>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker candidate as seen by the placement policy: its capability and its
/// current status/capacity configuration, bundled so C5 never has to re-query
/// the registry mid-selection.
#[derive(Clone)]
pub struct Candidate {
    pub handle: Arc<dyn WorkerHandle>,
    pub max_concurrency: u32,
    pub status: NodeStatus,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, handle: Arc<dyn WorkerHandle>, max_concurrency: u32, now: DateTime<Utc>) {
        let id = handle.id().to_string();
        let status = NodeStatus {
            node_id: id.clone(),
            cpu_load: 0.0,
            memory_used: 0,
            tasks_queued: 0,
            tasks_processing: 0,
            health_indicators: [100, 100, 100],
            last_heartbeat: now,
        };
        self.inner.insert(
            id,
            RegistryEntry {
                handle,
                max_concurrency,
                status,
            },
        );
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn WorkerHandle>> {
        self.inner.remove(id).map(|(_, entry)| entry.handle)
    }

    /// Overwrites the last-known status for `status.node_id`. Silently dropped if
    /// the worker is not registered.
    pub fn update_status(&self, status: NodeStatus) {
        if let Some(mut entry) = self.inner.get_mut(&status.node_id) {
            entry.status = status;
        } else {
            tracing::trace!(node_id = %status.node_id, "status update for unknown worker dropped");
        }
    }

    /// Ids of workers whose `last_heartbeat` is older than `threshold` as of `now`.
    pub fn stale_since(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<String> {
        self.inner
            .iter()
            .filter(|e| now - e.value().status.last_heartbeat > threshold)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<NodeStatus> {
        self.inner.iter().map(|e| e.value().status.clone()).collect()
    }

    pub fn get_candidate(&self, id: &str) -> Option<Candidate> {
        self.inner.get(id).map(|e| Candidate {
            handle: e.handle.clone(),
            max_concurrency: e.max_concurrency,
            status: e.status.clone(),
        })
    }

    pub fn iter_candidates(&self) -> Vec<Candidate> {
        self.inner
            .iter()
            .map(|e| Candidate {
                handle: e.value().handle.clone(),
                max_concurrency: e.value().max_concurrency,
                status: e.value().status.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
