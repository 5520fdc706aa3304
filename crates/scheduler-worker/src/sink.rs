//! The worker's one-way path back to the scheduler.
//!
//! Per the unidirectional-ownership design, a worker never holds a pointer
//! into the scheduler's own state (`TaskStore`/`WorkerRegistry`) — only this
//! narrow capability, so the worker crate never needs to depend on the
//! scheduler's orchestration logic, only on the two calls it actually needs.

use async_trait::async_trait;

use scheduler_kernel::{NodeStatus, TaskResult};

#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn notify_completed(&self, result: TaskResult);
    async fn update_node_status(&self, status: NodeStatus);
}

#[async_trait]
impl CompletionSink for scheduler_kernel::Scheduler {
    async fn notify_completed(&self, result: TaskResult) {
        scheduler_kernel::Scheduler::notify_completed(self, result).await;
    }

    async fn update_node_status(&self, status: NodeStatus) {
        scheduler_kernel::Scheduler::update_node_status(self, status).await;
    }
}
