//! TaskStore: tasks by id, the pending priority queue, and completed results.
//!
//! The source keyed its pending queue off a `std::priority_queue` adapter with a
//! hand-written comparator; here the same tie-break chain (priority desc, deadline
//! asc, created_at asc, id asc) is expressed directly as an `Ord` impl on a small
//! queue key, so a `BinaryHeap` does the same job without a second look at whether
//! the comparator's `<` reads backwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{KernelError, Result};
use crate::task::{Task, TaskId, TaskResult};

#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueKey {
    priority: u8,
    deadline: DateTime<Utc>,
    created_at: DateTime<Utc>,
    id: TaskId,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.deadline.cmp(&self.deadline))
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&Task> for QueueKey {
    fn from(task: &Task) -> Self {
        Self {
            priority: task.priority,
            deadline: task.deadline,
            created_at: task.created_at,
            id: task.id,
        }
    }
}

/// Holds tasks by id, the pending priority queue, and completed results.
///
/// Reads (`get`, `get_result`, `list_pending`) are lock-free against the id map;
/// mutations to the id map are per-entry atomic via `DashMap`'s sharded locking.
/// The pending queue is a single `Mutex<BinaryHeap<_>>`, held only long enough to
/// push or pop a key — never across a task lookup.
pub struct TaskStore {
    tasks: DashMap<TaskId, Task>,
    results: DashMap<TaskId, TaskResult>,
    queue: Mutex<BinaryHeap<QueueKey>>,
    total_completed: AtomicU64,
    completed_on_time: AtomicU64,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            results: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            total_completed: AtomicU64::new(0),
            completed_on_time: AtomicU64::new(0),
        }
    }

    /// Adds to the id map and pushes onto the pending queue. Fails if `id` is already present.
    pub fn insert(&self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(KernelError::TaskAlreadyExists(task.id));
        }
        let key = QueueKey::from(&task);
        self.tasks.insert(task.id, task);
        self.queue.lock().unwrap().push(key);
        Ok(())
    }

    /// Returns the highest-priority still-pending, still-unassigned, non-completed
    /// task, discarding any stale entries (assigned or cancelled since being queued)
    /// encountered along the way.
    pub fn pop_next_pending(&self) -> Option<Task> {
        loop {
            let key = self.queue.lock().unwrap().pop()?;
            match self.tasks.get(&key.id) {
                Some(task) if task.assigned_to.is_none() && task.completed_at.is_none() => {
                    return Some(task.clone());
                }
                _ => continue, // stale: task reassigned, completed, or dropped since queuing
            }
        }
    }

    /// Sets `assigned_to` and `started_at`. Idempotent if already assigned to the
    /// same worker; rejects reassignment to a different worker.
    pub fn mark_assigned(&self, id: TaskId, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or(KernelError::TaskNotFound(id))?;
        match &entry.assigned_to {
            Some(existing) if existing == worker_id => Ok(()),
            Some(_) => Err(KernelError::InvalidReassignment(id)),
            None => {
                entry.assigned_to = Some(worker_id.to_string());
                entry.started_at = Some(now);
                Ok(())
            }
        }
    }

    /// Clears `assigned_to` and pushes back onto the pending queue. No-op if completed.
    pub fn requeue(&self, id: TaskId) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or(KernelError::TaskNotFound(id))?;
        if entry.completed_at.is_some() {
            return Ok(());
        }
        entry.assigned_to = None;
        entry.started_at = None;
        let key = QueueKey::from(&entry);
        drop(entry);
        self.queue.lock().unwrap().push(key);
        Ok(())
    }

    /// Records a completion. Returns `Ok(true)` if accepted, `Ok(false)` if a result
    /// was already recorded for this id (the duplicate is dropped, not an error).
    pub fn record_completion(
        &self,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = result.task_id;
        let mut entry = self.tasks.get_mut(&id).ok_or(KernelError::TaskNotFound(id))?;
        if entry.completed_at.is_some() {
            return Ok(false);
        }
        entry.completed_at = Some(now);
        let deadline = entry.deadline;
        drop(entry);

        self.results.insert(id, result);
        self.total_completed.fetch_add(1, AtomicOrdering::Relaxed);
        if now <= deadline {
            self.completed_on_time.fetch_add(1, AtomicOrdering::Relaxed);
        }
        Ok(true)
    }

    /// Removes a task entirely (cancellation of a task not yet assigned).
    /// Returns whether it was present.
    pub fn drop_task(&self, id: TaskId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).map(|t| t.clone())
    }

    pub fn get_result(&self, id: TaskId) -> Option<TaskResult> {
        self.results.get(&id).map(|r| r.clone())
    }

    pub fn list_pending(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| t.status() == crate::task::TaskStatus::Pending)
            .map(|t| t.clone())
            .collect()
    }

    /// Tasks currently assigned to `worker_id` with no recorded completion.
    pub fn list_assigned_to(&self, worker_id: &str) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.completed_at.is_none() && t.assigned_to.as_deref() == Some(worker_id))
            .map(|t| t.id)
            .collect()
    }

    pub fn total_completed(&self) -> u64 {
        self.total_completed.load(AtomicOrdering::Relaxed)
    }

    pub fn completed_on_time(&self) -> u64 {
        self.completed_on_time.load(AtomicOrdering::Relaxed)
    }

    /// `completed_on_time / total_completed`, or `1.0` with nothing completed yet.
    pub fn deadline_satisfaction_rate(&self) -> f64 {
        let total = self.total_completed();
        if total == 0 {
            return 1.0;
        }
        self.completed_on_time() as f64 / total as f64
    }
}
