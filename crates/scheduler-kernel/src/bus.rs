//! Event bus: fan-out of task-completed and status-changed notifications.
//!
//! Built on [`tokio::sync::broadcast`], the same mechanism the host codebase uses
//! for its own zero-copy IPC bus: events are wrapped in `Arc` so broadcasting to
//! many subscribers never clones the payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::task::{NodeStatus, TaskResult};

/// An event published by the scheduler core. Delivery is at-most-once in-process,
/// unordered across topics, ordered within a single topic (both variants here are
/// distinct topics for this purpose).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    TaskCompleted(TaskResult),
    StatusChanged(NodeStatus),
}

/// Publish/subscribe event bus. Cheaply cloneable, `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire-and-forget publish. No back-pressure on the caller; if there are no
    /// subscribers the event is silently dropped (common during startup/shutdown).
    pub fn publish(&self, event: Event) {
        let event = Arc::new(event);
        match self.sender.send(event) {
            Ok(n) => tracing::trace!(receivers = n, "event published"),
            Err(_) => tracing::trace!("event published with no active subscribers"),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
