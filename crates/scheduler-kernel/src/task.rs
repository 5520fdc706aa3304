//! Task, TaskResult, and the NodeStatus worker-health snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// A unit of work with identity, payload, priority, and deadline.
///
/// `priority` is a small integer, higher is more urgent, matching the source's
/// raw priority byte rather than a fixed set of named tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub deadline: DateTime<Utc>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// `user_id` of the principal that submitted this task; used by PolicyGate
    /// implementations to resolve ownership-scoped grants (e.g. `cancel_task:own`).
    pub submitted_by: String,
}

impl Task {
    /// Construct a new pending task. `id` is generated if this is a fresh submission.
    pub fn new(
        task_type: impl Into<String>,
        payload: serde_json::Value,
        deadline: DateTime<Utc>,
        priority: u8,
        submitted_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            deadline,
            priority,
            created_at: Utc::now(),
            assigned_to: None,
            started_at: None,
            completed_at: None,
            submitted_by: submitted_by.into(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        if self.completed_at.is_some() {
            TaskStatus::Completed
        } else if self.assigned_to.is_some() {
            TaskStatus::InFlight
        } else {
            TaskStatus::Pending
        }
    }

    pub fn time_until_deadline(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.deadline - now
    }
}

/// One of the four states a task occupies over its lifetime (the fourth, `Absent`,
/// is represented by the task no longer existing in the store at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Completed,
}

/// The outcome of running a task, delivered to the scheduler exactly once per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub result_data: serde_json::Value,
    /// Empty iff `success`.
    pub error_message: String,
    pub execution_time_ms: u64,
}

impl TaskResult {
    pub fn failure(task_id: TaskId, error_message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            result_data: serde_json::Value::Null,
            error_message: error_message.into(),
            execution_time_ms,
        }
    }

    pub fn success(task_id: TaskId, result_data: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            task_id,
            success: true,
            result_data,
            error_message: String::new(),
            execution_time_ms,
        }
    }
}

/// A worker node's last-reported health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub cpu_load: f64,
    pub memory_used: u64,
    pub tasks_queued: u32,
    pub tasks_processing: u32,
    pub health_indicators: [u8; 3],
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeStatus {
    pub fn is_available(&self) -> bool {
        self.cpu_load < 90.0 && self.health_indicators.iter().all(|&h| h > 20)
    }

    pub fn health_score(&self) -> f64 {
        let avg = self.health_indicators.iter().map(|&h| h as f64).sum::<f64>() / 3.0;
        let load_factor = 1.0 - (self.cpu_load / 100.0);
        avg * load_factor
    }
}
