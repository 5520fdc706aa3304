//! Worker runtime: per-worker queue, bounded concurrent execution,
//! status sampling, heartbeat emission, and the stop protocol.
//!
//! Grounded in the host codebase's `Executor` (retry-with-backoff wrapping a
//! timed-out unit of work, converting every failure mode into a typed result
//! rather than propagating it) and `PeriodicTicker`/`CronScheduler` style for
//! the two background loops.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use scheduler_kernel::clock::{self, PeriodicTicker};
use scheduler_kernel::{NodeStatus, Task, TaskId, TaskResult, WorkerHandle};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::sink::CompletionSink;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> std::result::Result<serde_json::Value, String>;
}

struct WorkerState {
    pending: VecDeque<Task>,
    active: HashMap<TaskId, JoinHandle<()>>,
}

struct Inner {
    id: String,
    max_concurrency: u32,
    running: AtomicBool,
    state: Mutex<WorkerState>,
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
    sink: Arc<dyn CompletionSink>,
    config: WorkerConfig,
    sampler_ticker: PeriodicTicker,
    heartbeat_ticker: PeriodicTicker,
}

/// A single worker node: accepts tasks up to `max_concurrency`, executes them
/// against registered [`TaskHandler`]s, and reports results and health back
/// through a [`CompletionSink`]. Cheaply cloneable; all clones share one
/// worker's state.
#[derive(Clone)]
pub struct WorkerRuntime {
    inner: Arc<Inner>,
}

impl WorkerRuntime {
    pub fn new(
        id: impl Into<String>,
        max_concurrency: u32,
        sink: Arc<dyn CompletionSink>,
        config: WorkerConfig,
    ) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(WorkerError::InvalidConcurrency);
        }
        let inner = Arc::new(Inner {
            id: id.into(),
            max_concurrency,
            running: AtomicBool::new(false),
            state: Mutex::new(WorkerState {
                pending: VecDeque::new(),
                active: HashMap::new(),
            }),
            handlers: DashMap::new(),
            sink,
            config,
            sampler_ticker: PeriodicTicker::new(),
            heartbeat_ticker: PeriodicTicker::new(),
        });
        Ok(Self { inner })
    }

    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.inner.handlers.insert(task_type.into(), handler);
    }

    /// Sets running, starts the status sampler and heartbeat emitter.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);

        let sampler_self = self.clone();
        self.inner
            .sampler_ticker
            .start(StdDuration::from_millis(self.inner.config.status_sampler_ms), move || {
                let worker = sampler_self.clone();
                async move {
                    worker.refresh_status();
                }
            });

        let heartbeat_self = self.clone();
        self.inner
            .heartbeat_ticker
            .start(StdDuration::from_millis(self.inner.config.heartbeat_emitter_ms), move || {
                let worker = heartbeat_self.clone();
                async move {
                    worker.emit_heartbeat().await;
                }
            });
    }

    /// Sets running false, cancels timers, and fails out every queued and
    /// in-flight task with `"worker shut down"` before clearing both.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.sampler_ticker.stop().await;
        self.inner.heartbeat_ticker.stop().await;

        let (pending, active) = {
            let mut state = self.inner.state.lock().unwrap();
            (
                state.pending.drain(..).collect::<Vec<_>>(),
                state.active.drain().collect::<Vec<_>>(),
            )
        };

        for task in pending {
            self.inner
                .sink
                .notify_completed(TaskResult::failure(task.id, "worker shut down", 0))
                .await;
        }
        for (task_id, handle) in active {
            handle.abort();
            self.inner
                .sink
                .notify_completed(TaskResult::failure(task_id, "worker shut down", 0))
                .await;
        }
    }

    pub fn sample_status(&self) -> NodeStatus {
        self.compute_status()
    }

    fn refresh_status(&self) {
        // The sampler recomputes; `compute_status` already reads live queue
        // depths, so there is nothing further to persist here beyond giving
        // the heartbeat emitter a fresh `last_heartbeat` on its own tick.
        let _ = self.compute_status();
    }

    async fn emit_heartbeat(&self) {
        let status = self.compute_status();
        self.inner.sink.update_node_status(status).await;
    }

    /// `cpu_load` is derived from active/`max_concurrency` utilization, not
    /// real host telemetry — this reference worker has no OS-level resource
    /// introspection, which the status sampler's contract leaves
    /// implementation-defined.
    fn compute_status(&self) -> NodeStatus {
        let (tasks_queued, tasks_processing) = {
            let state = self.inner.state.lock().unwrap();
            (state.pending.len() as u32, state.active.len() as u32)
        };
        let utilization = tasks_processing as f64 / self.inner.max_concurrency as f64;
        let cpu_load = (utilization * 100.0).min(100.0);
        let health = if cpu_load < 90.0 { 90u8 } else { 40u8 };
        NodeStatus {
            node_id: self.inner.id.clone(),
            cpu_load,
            memory_used: 0,
            tasks_queued,
            tasks_processing,
            health_indicators: [health, health, health],
            last_heartbeat: clock::now(),
        }
    }

    /// Moves as many pending tasks into `active` as the concurrency budget
    /// allows, spawning an execution for each. Never blocks: `tokio::spawn`
    /// is synchronous, so the state lock is never held across an await.
    fn dispatch(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.active.len() < self.inner.max_concurrency as usize {
            let Some(task) = state.pending.pop_front() else {
                break;
            };
            let worker = self.clone();
            let task_id = task.id;
            let handle = tokio::spawn(async move { worker.run_task(task).await });
            state.active.insert(task_id, handle);
        }
    }

    async fn run_task(&self, task: Task) {
        let handler = self.inner.handlers.get(&task.task_type).map(|h| h.clone());
        let result = match handler {
            None => TaskResult::failure(
                task.id,
                format!("no handler registered for task type '{}'", task.task_type),
                0,
            ),
            Some(handler) => self.execute_with_retry(handler, &task).await,
        };
        self.inner.sink.notify_completed(result).await;

        self.inner.state.lock().unwrap().active.remove(&task.id);
        self.dispatch();
    }

    async fn execute_with_retry(&self, handler: Arc<dyn TaskHandler>, task: &Task) -> TaskResult {
        let config = &self.inner.config;
        let mut delay = config.initial_retry_delay;
        let max_attempts = config.max_retries + 1;
        let start = Instant::now();

        for attempt in 1..=max_attempts {
            let outcome = tokio::time::timeout(config.execution_timeout, handler.handle(task)).await;
            match outcome {
                Ok(Ok(value)) => {
                    return TaskResult::success(task.id, value, start.elapsed().as_millis() as u64);
                }
                Ok(Err(message)) => {
                    if attempt < max_attempts {
                        tracing::warn!(task_id = %task.id, attempt, error = %message, "task failed; retrying");
                        tokio::time::sleep(delay).await;
                        delay = StdDuration::from_secs_f64(
                            (delay.as_secs_f64() * config.retry_backoff_factor)
                                .min(config.max_retry_delay.as_secs_f64()),
                        );
                    } else {
                        return TaskResult::failure(task.id, message, start.elapsed().as_millis() as u64);
                    }
                }
                Err(_elapsed) => {
                    if attempt < max_attempts {
                        tracing::warn!(task_id = %task.id, attempt, timeout = ?config.execution_timeout, "task timed out; retrying");
                        tokio::time::sleep(delay).await;
                        delay = StdDuration::from_secs_f64(
                            (delay.as_secs_f64() * config.retry_backoff_factor)
                                .min(config.max_retry_delay.as_secs_f64()),
                        );
                    } else {
                        return TaskResult::failure(
                            task.id,
                            format!("timed out after {:?}", config.execution_timeout),
                            start.elapsed().as_millis() as u64,
                        );
                    }
                }
            }
        }

        // Unreachable: the loop above always returns by its last iteration.
        TaskResult::failure(task.id, "unexpected worker state", start.elapsed().as_millis() as u64)
    }
}

#[async_trait]
impl WorkerHandle for WorkerRuntime {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn accept_task(&self, task: Task) -> bool {
        if !self.is_running() {
            return false;
        }
        let admitted = {
            let mut state = self.inner.state.lock().unwrap();
            if state.active.len() >= self.inner.max_concurrency as usize {
                false
            } else {
                state.pending.push_back(task);
                true
            }
        };
        if admitted {
            self.dispatch();
        }
        admitted
    }

    async fn cancel(&self, task_id: TaskId) -> bool {
        let found_in_pending = {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(pos) = state.pending.iter().position(|t| t.id == task_id) {
                state.pending.remove(pos);
                true
            } else {
                false
            }
        };
        if found_in_pending {
            self.inner
                .sink
                .notify_completed(TaskResult::failure(task_id, "cancelled", 0))
                .await;
            return true;
        }

        let handle = self.inner.state.lock().unwrap().active.remove(&task_id);
        match handle {
            Some(handle) => {
                handle.abort();
                self.inner
                    .sink
                    .notify_completed(TaskResult::failure(task_id, "cancelled", 0))
                    .await;
                self.dispatch();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_kernel::Task;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        results: AsyncMutex<Vec<TaskResult>>,
        statuses: AsyncMutex<Vec<NodeStatus>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                results: AsyncMutex::new(Vec::new()),
                statuses: AsyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionSink for RecordingSink {
        async fn notify_completed(&self, result: TaskResult) {
            self.results.lock().await.push(result);
        }
        async fn update_node_status(&self, status: NodeStatus) {
            self.statuses.lock().await.push(status);
        }
    }

    struct EchoHandler;
    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, task: &Task) -> std::result::Result<serde_json::Value, String> {
            Ok(task.payload.clone())
        }
    }

    struct BlockingHandler {
        release: tokio::sync::Notify,
    }
    #[async_trait]
    impl TaskHandler for BlockingHandler {
        async fn handle(&self, _task: &Task) -> std::result::Result<serde_json::Value, String> {
            self.release.notified().await;
            Ok(serde_json::json!({}))
        }
    }

    struct FailNTimesHandler {
        remaining_failures: AtomicU32,
    }
    #[async_trait]
    impl TaskHandler for FailNTimesHandler {
        async fn handle(&self, _task: &Task) -> std::result::Result<serde_json::Value, String> {
            if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err("simulated failure".into())
            } else {
                Ok(serde_json::json!({"recovered": true}))
            }
        }
    }

    fn task(task_type: &str) -> Task {
        Task::new(
            task_type,
            serde_json::json!({"n": 1}),
            chrono::Utc::now() + chrono::Duration::seconds(60),
            5,
            "alice",
        )
    }

    #[test]
    fn new_rejects_zero_concurrency() {
        let sink = RecordingSink::new();
        let result = WorkerRuntime::new("w1", 0, sink, WorkerConfig::default());
        assert!(matches!(result, Err(WorkerError::InvalidConcurrency)));
    }

    #[tokio::test]
    async fn accept_task_rejected_when_not_running() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 2, sink, WorkerConfig::default()).unwrap();
        assert!(!worker.accept_task(task("echo")).await);
    }

    #[tokio::test]
    async fn accepted_task_executes_and_reports_success() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 2, sink.clone(), WorkerConfig::default()).unwrap();
        worker.register_handler("echo", Arc::new(EchoHandler));
        worker.start();

        assert!(worker.accept_task(task("echo")).await);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let results = sink.results.lock().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        worker.stop().await;
    }

    #[tokio::test]
    async fn missing_handler_reports_failure() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 2, sink.clone(), WorkerConfig::default()).unwrap();
        worker.start();

        assert!(worker.accept_task(task("unregistered")).await);
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let results = sink.results.lock().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error_message.contains("no handler"));
        worker.stop().await;
    }

    #[tokio::test]
    async fn accept_task_rejected_when_active_at_capacity() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 1, sink, WorkerConfig::default()).unwrap();
        let gate = Arc::new(BlockingHandler {
            release: tokio::sync::Notify::new(),
        });
        worker.register_handler("slow", gate.clone());
        worker.start();

        // dispatch() runs synchronously inside accept_task, so the first task
        // occupies the only concurrency slot by the time this await returns.
        assert!(worker.accept_task(task("slow")).await);
        assert!(!worker.accept_task(task("slow")).await);

        gate.release.notify_one();
        worker.stop().await;
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let sink = RecordingSink::new();
        let config = WorkerConfig {
            initial_retry_delay: StdDuration::from_millis(5),
            ..WorkerConfig::default()
        };
        let worker = WorkerRuntime::new("w1", 2, sink.clone(), config).unwrap();
        worker.register_handler(
            "flaky",
            Arc::new(FailNTimesHandler {
                remaining_failures: AtomicU32::new(1),
            }),
        );
        worker.start();

        assert!(worker.accept_task(task("flaky")).await);
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let results = sink.results.lock().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        worker.stop().await;
    }

    #[tokio::test]
    async fn cancel_pending_task_reports_cancelled() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 1, sink.clone(), WorkerConfig::default()).unwrap();
        // No handler registered and worker not started: task sits in pending forever.
        worker.inner.running.store(true, Ordering::SeqCst);
        let id = {
            let t = task("echo");
            let id = t.id;
            worker.inner.state.lock().unwrap().pending.push_back(t);
            id
        };

        assert!(worker.cancel(id).await);
        let results = sink.results.lock().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_message, "cancelled");
    }

    #[tokio::test]
    async fn stop_fails_out_pending_tasks() {
        let sink = RecordingSink::new();
        let worker = WorkerRuntime::new("w1", 1, sink.clone(), WorkerConfig::default()).unwrap();
        worker.inner.running.store(true, Ordering::SeqCst);
        let t = task("echo");
        worker.inner.state.lock().unwrap().pending.push_back(t);

        worker.stop().await;
        let results = sink.results.lock().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_message, "worker shut down");
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn heartbeat_emitter_publishes_status() {
        let sink = RecordingSink::new();
        let config = WorkerConfig {
            heartbeat_emitter_ms: 5,
            ..WorkerConfig::default()
        };
        let worker = WorkerRuntime::new("w1", 2, sink.clone(), config).unwrap();
        worker.start();
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        worker.stop().await;

        let statuses = sink.statuses.lock().await;
        assert!(!statuses.is_empty());
        assert_eq!(statuses[0].node_id, "w1");
    }
}
