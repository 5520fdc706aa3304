//! Scheduler core: admission, placement, completion, cancellation, failure
//! handling, and the two cooperating control loops.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::bus::{Event, EventBus};
use crate::clock::{self, PeriodicTicker};
use crate::completion::CompletionAwaitable;
use crate::config::SchedulerConfig;
use crate::error::{KernelError, Result};
use crate::placement::PlacementPolicy;
use crate::policy::{PolicyAction, PolicyGate, Principal, ResourceDescriptor};
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::store::TaskStore;
use crate::task::{NodeStatus, Task, TaskId, TaskResult};

/// Caller-supplied fields for a new task; the scheduler fills in `id`,
/// `created_at`, and `submitted_by`.
pub struct SubmitRequest {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub deadline: DateTime<Utc>,
    pub priority: u8,
}

struct SchedulerInner {
    store: TaskStore,
    registry: WorkerRegistry,
    bus: EventBus,
    policy: Arc<dyn PolicyGate>,
    placement: PlacementPolicy,
    config: SchedulerConfig,
    placement_ticker: PeriodicTicker,
    heartbeat_ticker: PeriodicTicker,
}

/// Orchestrates the whole scheduler: owns the TaskStore and WorkerRegistry
/// exclusively, and is the only component that acquires both (always
/// WorkerRegistry before TaskStore, see `handle_worker_failure`).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(policy: Arc<dyn PolicyGate>, config: SchedulerConfig) -> Self {
        let bus = EventBus::new(config.event_bus_capacity);
        Self {
            inner: Arc::new(SchedulerInner {
                store: TaskStore::new(),
                registry: WorkerRegistry::new(),
                bus,
                policy,
                placement: PlacementPolicy::default(),
                placement_ticker: PeriodicTicker::new(),
                heartbeat_ticker: PeriodicTicker::new(),
                config,
            }),
        }
    }

    /// Starts the placement tick and heartbeat audit loops.
    pub fn start(&self) {
        let placement_period = StdDuration::from_millis(self.inner.config.placement_tick_ms);
        let heartbeat_period = StdDuration::from_millis(self.inner.config.heartbeat_audit_ms);

        let scheduler = self.clone();
        self.inner
            .placement_ticker
            .start(placement_period, move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.placement_tick().await;
                }
            });

        let scheduler = self.clone();
        self.inner
            .heartbeat_ticker
            .start(heartbeat_period, move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.heartbeat_audit_tick().await;
                }
            });
    }

    /// Stops both control loops and awaits their current iteration finishing.
    pub async fn shutdown(&self) {
        self.inner.placement_ticker.stop().await;
        self.inner.heartbeat_ticker.stop().await;
    }

    // -- Public operations ---------------------------------------------------

    pub async fn submit(&self, request: SubmitRequest, principal: &Principal) -> Result<TaskId> {
        let now = clock::now();
        if !principal.is_valid(now) {
            return Err(KernelError::InvalidPrincipal);
        }

        let authorized = self
            .inner
            .policy
            .authorize(
                principal,
                PolicyAction::Submit,
                ResourceDescriptor {
                    task_type: &request.task_type,
                    submitted_by: &principal.user_id,
                },
            )
            .await;
        if !authorized {
            return Err(KernelError::Unauthorized);
        }

        let task = Task::new(
            request.task_type,
            request.payload,
            request.deadline,
            request.priority,
            principal.user_id.clone(),
        );
        let id = task.id;
        self.inner.store.insert(task)?;
        Ok(id)
    }

    /// Returns an awaitable for `id`'s eventual completion. If a result is
    /// already recorded it resolves immediately; otherwise it subscribes to
    /// the bus *before* re-checking the store, so a completion published in
    /// the gap between the two checks is never missed.
    pub fn await_completion(&self, id: TaskId) -> CompletionAwaitable {
        if let Some(result) = self.inner.store.get_result(id) {
            return CompletionAwaitable::ready(id, result);
        }
        let rx = self.inner.bus.subscribe();
        if let Some(result) = self.inner.store.get_result(id) {
            return CompletionAwaitable::ready(id, result);
        }
        CompletionAwaitable::pending(id, rx)
    }

    pub async fn cancel(&self, id: TaskId, principal: &Principal) -> Result<bool> {
        let now = clock::now();
        if !principal.is_valid(now) {
            return Err(KernelError::InvalidPrincipal);
        }

        let Some(task) = self.inner.store.get(id) else {
            return Ok(false);
        };

        let authorized = self
            .inner
            .policy
            .authorize(
                principal,
                PolicyAction::Cancel,
                ResourceDescriptor {
                    task_type: &task.task_type,
                    submitted_by: &task.submitted_by,
                },
            )
            .await;
        if !authorized {
            return Err(KernelError::Unauthorized);
        }

        if task.completed_at.is_some() {
            return Ok(false);
        }

        match &task.assigned_to {
            None => {
                self.inner.store.drop_task(id);
                Ok(true)
            }
            Some(worker_id) => {
                if let Some(candidate) = self.inner.registry.get_candidate(worker_id) {
                    candidate.handle.cancel(id).await;
                }
                // The scheduler records the cancellation itself rather than
                // waiting on the worker's own completion callback: this keeps
                // the worker side a pure capability (no back-pointer into the
                // scheduler) and guarantees the single-completion invariant
                // deterministically — any later genuine completion from the
                // worker for this id finds `record_completion` already settled
                // and is dropped as a duplicate.
                self.notify_completed(TaskResult::failure(id, "cancelled", 0))
                    .await;
                Ok(true)
            }
        }
    }

    pub async fn notify_completed(&self, result: TaskResult) {
        let now = clock::now();
        let task_id = result.task_id;
        match self.inner.store.record_completion(result.clone(), now) {
            Ok(true) => {
                self.inner.bus.publish(Event::TaskCompleted(result));
            }
            Ok(false) => {
                tracing::trace!(task_id = %task_id, "duplicate completion dropped");
            }
            Err(KernelError::TaskNotFound(_)) => {
                tracing::trace!(task_id = %task_id, "completion for unknown task dropped");
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "unexpected error recording completion");
            }
        }
    }

    pub fn register_worker(&self, handle: Arc<dyn WorkerHandle>, max_concurrency: u32) {
        self.inner.registry.register(handle, max_concurrency, clock::now());
    }

    /// Evicts the worker and, per the failure handler below, requeues
    /// whatever tasks were in flight on it.
    pub async fn unregister_worker(&self, id: &str) {
        self.handle_worker_failure(id).await;
    }

    pub async fn update_node_status(&self, status: NodeStatus) {
        self.inner.registry.update_status(status.clone());
        self.inner.bus.publish(Event::StatusChanged(status));
    }

    pub fn list_pending(&self) -> Vec<Task> {
        self.inner.store.list_pending()
    }

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.inner.store.get(id)
    }

    pub fn get_result(&self, id: TaskId) -> Option<TaskResult> {
        self.inner.store.get_result(id)
    }

    pub fn total_completed(&self) -> u64 {
        self.inner.store.total_completed()
    }

    pub fn completed_on_time(&self) -> u64 {
        self.inner.store.completed_on_time()
    }

    pub fn deadline_satisfaction_rate(&self) -> f64 {
        self.inner.store.deadline_satisfaction_rate()
    }

    pub fn worker_snapshot(&self) -> Vec<NodeStatus> {
        self.inner.registry.snapshot()
    }

    // -- Control loops --------------------------------------------------------

    /// Drains the pending queue while it is non-empty and the placement policy
    /// keeps finding an eligible worker. Stops the tick (leaving the current
    /// task requeued at the head) as soon as placement fails to find a worker
    /// or the chosen worker rejects the hand-off — it does not spin or skip
    /// ahead to a lower-priority task.
    async fn placement_tick(&self) {
        loop {
            let Some(task) = self.inner.store.pop_next_pending() else {
                break;
            };

            let candidates = self.inner.registry.iter_candidates();
            let now = clock::now();
            let Some(handle) = self.inner.placement.select(&task, &candidates, now) else {
                let _ = self.inner.store.requeue(task.id);
                break;
            };

            if !handle.accept_task(task.clone()).await {
                let _ = self.inner.store.requeue(task.id);
                break;
            }

            let _ = self
                .inner
                .store
                .mark_assigned(task.id, handle.id(), clock::now());
        }
    }

    /// Evicts workers whose heartbeat is older than the configured staleness
    /// threshold, then immediately runs a placement tick so their requeued
    /// tasks don't wait a full tick period to be reassigned.
    async fn heartbeat_audit_tick(&self) {
        let now = clock::now();
        let threshold = chrono::Duration::seconds(self.inner.config.worker_staleness_secs);
        let stale = self.inner.registry.stale_since(now, threshold);

        let mut evicted_any = false;
        for worker_id in stale {
            self.handle_worker_failure(&worker_id).await;
            evicted_any = true;
        }

        if evicted_any {
            self.placement_tick().await;
        }
    }

    /// Removes the worker from the registry, then requeues every task that was
    /// assigned to it with no recorded completion. The registry mutation
    /// happens first so a concurrently running placement tick can never
    /// re-select the worker being evicted (WorkerRegistry -> TaskStore lock
    /// ordering, per the shared-resource discipline).
    async fn handle_worker_failure(&self, worker_id: &str) {
        self.inner.registry.unregister(worker_id);
        let orphaned = self.inner.store.list_assigned_to(worker_id);
        for task_id in &orphaned {
            let _ = self.inner.store.requeue(*task_id);
        }
        if !orphaned.is_empty() {
            tracing::warn!(worker_id, orphaned = orphaned.len(), "worker evicted; tasks requeued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ResourceDescriptor;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    struct AllowAllPolicy;
    #[async_trait]
    impl PolicyGate for AllowAllPolicy {
        async fn authorize(&self, _p: &Principal, _a: PolicyAction, _r: ResourceDescriptor<'_>) -> bool {
            true
        }
    }

    struct DenyAllPolicy;
    #[async_trait]
    impl PolicyGate for DenyAllPolicy {
        async fn authorize(&self, _p: &Principal, _a: PolicyAction, _r: ResourceDescriptor<'_>) -> bool {
            false
        }
    }

    struct RecordingWorker {
        id: String,
        running: AtomicBool,
        accepted_order: Arc<Mutex<Vec<TaskId>>>,
        active: AtomicU32,
    }

    #[async_trait]
    impl WorkerHandle for RecordingWorker {
        fn id(&self) -> &str {
            &self.id
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        async fn accept_task(&self, task: Task) -> bool {
            self.accepted_order.lock().unwrap().push(task.id);
            self.active.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn cancel(&self, _task_id: TaskId) -> bool {
            true
        }
    }

    fn principal() -> Principal {
        Principal {
            user_id: "alice".into(),
            roles: vec!["user".into()],
            token: "tok".into(),
            token_expiry: Utc::now() + Duration::seconds(60),
        }
    }

    fn available_status(node_id: &str, tasks_processing: u32) -> NodeStatus {
        NodeStatus {
            node_id: node_id.to_string(),
            cpu_load: 10.0,
            memory_used: 0,
            tasks_queued: 0,
            tasks_processing,
            health_indicators: [90, 90, 90],
            last_heartbeat: Utc::now(),
        }
    }

    #[tokio::test]
    async fn submit_denied_by_policy_returns_unauthorized() {
        let scheduler = Scheduler::new(Arc::new(DenyAllPolicy), SchedulerConfig::default());
        let result = scheduler
            .submit(
                SubmitRequest {
                    task_type: "admin-only".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await;
        assert!(matches!(result, Err(KernelError::Unauthorized)));
        assert!(scheduler.list_pending().is_empty());
    }

    #[tokio::test]
    async fn submit_with_expired_principal_is_invalid() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let mut expired = principal();
        expired.token_expiry = Utc::now() - Duration::seconds(1);
        let result = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &expired,
            )
            .await;
        assert!(matches!(result, Err(KernelError::InvalidPrincipal)));
    }

    #[tokio::test]
    async fn submit_is_visible_in_list_pending_before_placement() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        let pending = scheduler.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[tokio::test]
    async fn placement_tick_assigns_in_priority_order() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let worker = Arc::new(RecordingWorker {
            id: "w1".into(),
            running: AtomicBool::new(true),
            accepted_order: order.clone(),
            active: AtomicU32::new(0),
        });
        scheduler.register_worker(worker, 3);
        scheduler
            .update_node_status(available_status("w1", 0))
            .await;

        let mut ids = vec![];
        for priority in [1u8, 10, 5] {
            let id = scheduler
                .submit(
                    SubmitRequest {
                        task_type: "compute".into(),
                        payload: serde_json::json!({}),
                        deadline: Utc::now() + Duration::seconds(60),
                        priority,
                    },
                    &principal(),
                )
                .await
                .unwrap();
            ids.push((priority, id));
        }

        scheduler.placement_tick().await;

        let accepted = order.lock().unwrap().clone();
        let expected: Vec<TaskId> = [10u8, 5, 1]
            .iter()
            .map(|p| ids.iter().find(|(prio, _)| prio == p).unwrap().1)
            .collect();
        assert_eq!(accepted, expected);
    }

    #[tokio::test]
    async fn worker_eviction_requeues_in_flight_tasks() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let worker = Arc::new(RecordingWorker {
            id: "w1".into(),
            running: AtomicBool::new(true),
            accepted_order: Arc::new(Mutex::new(Vec::new())),
            active: AtomicU32::new(0),
        });
        scheduler.register_worker(worker, 3);
        scheduler
            .update_node_status(available_status("w1", 0))
            .await;

        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler.placement_tick().await;
        assert!(scheduler.get_task(id).unwrap().assigned_to.is_some());

        scheduler.unregister_worker("w1").await;

        let task = scheduler.get_task(id).unwrap();
        assert!(task.assigned_to.is_none());
        assert_eq!(task.status(), crate::task::TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_of_pending_task_drops_it() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        let cancelled = scheduler.cancel(id, &principal()).await.unwrap();
        assert!(cancelled);
        assert!(scheduler.get_task(id).is_none());
    }

    #[tokio::test]
    async fn cancel_of_assigned_task_delivers_exactly_one_cancelled_result() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let worker = Arc::new(RecordingWorker {
            id: "w1".into(),
            running: AtomicBool::new(true),
            accepted_order: Arc::new(Mutex::new(Vec::new())),
            active: AtomicU32::new(0),
        });
        scheduler.register_worker(worker, 3);
        scheduler
            .update_node_status(available_status("w1", 0))
            .await;
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler.placement_tick().await;

        assert!(scheduler.cancel(id, &principal()).await.unwrap());
        let result = scheduler.get_result(id).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_message, "cancelled");

        // A late natural completion from the worker must be dropped, not overwrite the result.
        scheduler
            .notify_completed(TaskResult::success(id, serde_json::json!({"late": true}), 5))
            .await;
        let still = scheduler.get_result(id).unwrap();
        assert_eq!(still.error_message, "cancelled");
    }

    #[tokio::test]
    async fn cancel_of_already_completed_task_is_a_noop() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler
            .notify_completed(TaskResult::success(id, serde_json::json!({}), 1))
            .await;
        assert!(!scheduler.cancel(id, &principal()).await.unwrap());
    }

    #[tokio::test]
    async fn notify_completed_is_idempotent() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler
            .notify_completed(TaskResult::success(id, serde_json::json!({"n": 1}), 1))
            .await;
        scheduler
            .notify_completed(TaskResult::success(id, serde_json::json!({"n": 2}), 1))
            .await;
        assert_eq!(scheduler.total_completed(), 1);
        assert_eq!(scheduler.get_result(id).unwrap().result_data, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn await_completion_resolves_for_an_already_completed_task() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler
            .notify_completed(TaskResult::success(id, serde_json::json!({}), 1))
            .await;
        let result = scheduler.await_completion(id).wait().await;
        assert_eq!(result.task_id, id);
    }

    #[tokio::test]
    async fn await_completion_resolves_once_the_task_finishes_later() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        let awaitable = scheduler.await_completion(id);
        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(awaitable.wait());
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        scheduler_clone
            .notify_completed(TaskResult::success(id, serde_json::json!({}), 1))
            .await;
        let result = handle.await.unwrap();
        assert_eq!(result.task_id, id);
    }

    #[tokio::test]
    async fn empty_worker_set_leaves_tasks_pending() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        scheduler
            .submit(
                SubmitRequest {
                    task_type: "compute".into(),
                    payload: serde_json::json!({}),
                    deadline: Utc::now() + Duration::seconds(60),
                    priority: 1,
                },
                &principal(),
            )
            .await
            .unwrap();
        scheduler.placement_tick().await;
        assert_eq!(scheduler.list_pending().len(), 1);
    }

    /// Covers the concurrency/property note in SPEC_FULL.md §8: fill a worker to
    /// capacity (via its reported status, not the handle's own bookkeeping), queue
    /// more tasks than it can take, cancel one before it is ever popped, then free
    /// a slot and confirm the pop order over the *surviving* tasks still respects
    /// T5 (priority desc, deadline asc, created_at asc, id asc).
    #[tokio::test]
    async fn saturation_then_cancel_then_free_slot_preserves_pop_order() {
        let scheduler = Scheduler::new(Arc::new(AllowAllPolicy), SchedulerConfig::default());
        let worker = Arc::new(RecordingWorker {
            id: "w1".into(),
            running: AtomicBool::new(true),
            accepted_order: Arc::new(Mutex::new(Vec::new())),
            active: AtomicU32::new(0),
        });
        scheduler.register_worker(worker.clone(), 1);
        // Worker reports itself already at its one-task capacity.
        scheduler
            .update_node_status(available_status("w1", 1))
            .await;

        let mut ids = vec![];
        for priority in [10u8, 1] {
            let id = scheduler
                .submit(
                    SubmitRequest {
                        task_type: "compute".into(),
                        payload: serde_json::json!({}),
                        deadline: Utc::now() + Duration::seconds(60),
                        priority,
                    },
                    &principal(),
                )
                .await
                .unwrap();
            ids.push((priority, id));
        }
        let high_priority_id = ids[0].1;
        let low_priority_id = ids[1].1;

        // Neither task is admissible yet: the worker is saturated.
        scheduler.placement_tick().await;
        assert_eq!(scheduler.list_pending().len(), 2);

        // Cancel the higher-priority task before it was ever popped.
        assert!(scheduler.cancel(high_priority_id, &principal()).await.unwrap());

        // Free the slot and let placement run again.
        scheduler
            .update_node_status(available_status("w1", 0))
            .await;
        scheduler.placement_tick().await;

        let accepted = worker.accepted_order.lock().unwrap().clone();
        assert_eq!(accepted, vec![low_priority_id]);
        assert!(scheduler.get_task(high_priority_id).is_none());
    }
}
