//! Completion awaitable: suspends a caller until a specific task completes.
//!
//! State machine: `Pending -> Ready`. Once ready it yields the result exactly once.
//! Subscription lifetime is tied to the awaitable's own lifetime: a `Pending`
//! awaitable holds a `broadcast::Receiver`, and dropping it (without ever calling
//! `wait`) unsubscribes for free via the receiver's own `Drop` — no extra
//! bookkeeping is needed on the bus side.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::Event;
use crate::task::{TaskId, TaskResult};

enum State {
    Ready(TaskResult),
    Pending(broadcast::Receiver<Arc<Event>>),
}

pub struct CompletionAwaitable {
    task_id: TaskId,
    state: State,
}

impl CompletionAwaitable {
    /// A result is already available; the awaitable resolves immediately.
    pub fn ready(task_id: TaskId, result: TaskResult) -> Self {
        Self {
            task_id,
            state: State::Ready(result),
        }
    }

    /// No result yet; `rx` was subscribed *before* re-checking for an already
    /// recorded result, so the caller is responsible for the check-subscribe-
    /// recheck ordering that avoids missing a completion published in between.
    pub fn pending(task_id: TaskId, rx: broadcast::Receiver<Arc<Event>>) -> Self {
        Self {
            task_id,
            state: State::Pending(rx),
        }
    }

    /// Suspends until the named task's completion is published, then yields it
    /// exactly once. Ignores events for other task ids and tolerates a lagged
    /// receiver by continuing to listen (the single-completion guarantee lives
    /// in the TaskStore, not in the bus's delivery). If every `Scheduler` clone
    /// is dropped while this awaitable is still pending, the bus's sender goes
    /// away too; rather than treat that as a bug, it resolves to a synthesized
    /// failure result so a caller polling `wait()` still gets a single answer.
    pub async fn wait(self) -> TaskResult {
        match self.state {
            State::Ready(result) => result,
            State::Pending(mut rx) => loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Event::TaskCompleted(result) = event.as_ref() {
                            if result.task_id == self.task_id {
                                return result.clone();
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return TaskResult::failure(self.task_id, "scheduler shut down", 0);
                    }
                }
            },
        }
    }
}
