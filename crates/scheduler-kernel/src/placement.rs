//! Placement policy: scores (worker, task) pairs and picks the best admissible one.
//!
//! Grounded in the host codebase's failover candidate-selection style (filter out
//! ineligible candidates, then pick among what remains) generalized from "first
//! eligible" to "highest scored, ties by id" since placement needs to rank rather
//! than just find *a* fallback.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::registry::{Candidate, WorkerHandle};
use crate::task::Task;

/// Estimates how long a task will take to run, used by the admissibility filter's
/// deadline-slack check. MUST be monotone in task difficulty.
pub trait RuntimeEstimator: Send + Sync {
    fn estimate(&self, task: &Task) -> Duration;
}

/// Estimates runtime from payload size, keyed loosely by task type. A placeholder
/// for whatever cost model a real deployment plugs in; the only contract that
/// matters to the scheduler is monotonicity.
pub struct DefaultRuntimeEstimator;

impl RuntimeEstimator for DefaultRuntimeEstimator {
    fn estimate(&self, task: &Task) -> Duration {
        let payload_weight = task.payload.to_string().len() as i64;
        Duration::milliseconds(50 + payload_weight * 2)
    }
}

/// Memory threshold under which an "io" task gets the affinity bonus.
const IO_AFFINITY_MEMORY_THRESHOLD: u64 = 1_000_000_000;

pub struct PlacementPolicy {
    estimator: Box<dyn RuntimeEstimator>,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::new(Box::new(DefaultRuntimeEstimator))
    }
}

impl PlacementPolicy {
    pub fn new(estimator: Box<dyn RuntimeEstimator>) -> Self {
        Self { estimator }
    }

    /// For each candidate, applies the admissibility filter, then scores the
    /// survivors; returns the highest-scored handle, ties broken by worker id.
    pub fn select(
        &self,
        task: &Task,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> Option<Arc<dyn WorkerHandle>> {
        candidates
            .iter()
            .filter(|c| self.is_admissible(task, c, now))
            .map(|c| (self.score(task, c), c.handle.id().to_string(), c.handle.clone()))
            .max_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.cmp(&a.1)) // smaller id wins ties
            })
            .map(|(_, _, handle)| handle)
    }

    fn is_admissible(&self, task: &Task, candidate: &Candidate, now: DateTime<Utc>) -> bool {
        let running = candidate.handle.is_running();
        let under_capacity = candidate.status.tasks_processing < candidate.max_concurrency;
        let available = candidate.status.is_available();
        let runway = task.time_until_deadline(now) > self.estimator.estimate(task) * 2;

        running && under_capacity && available && runway
    }

    fn score(&self, task: &Task, candidate: &Candidate) -> f64 {
        let mut score = candidate.status.health_score();

        score += match task.task_type.as_str() {
            "compute" if candidate.status.cpu_load < 50.0 => 10.0,
            "io" if candidate.status.memory_used < IO_AFFINITY_MEMORY_THRESHOLD => 10.0,
            _ => 0.0,
        };

        let urgency = task.time_until_deadline(Utc::now());
        score += if urgency < Duration::seconds(1) {
            20.0
        } else if urgency < Duration::seconds(5) {
            10.0
        } else {
            0.0
        };

        score -= 5.0 * candidate.status.tasks_processing as f64;
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerHandle;
    use crate::task::{NodeStatus, Task, TaskId};
    use async_trait::async_trait;

    struct StubWorker {
        id: String,
        running: bool,
    }

    #[async_trait]
    impl WorkerHandle for StubWorker {
        fn id(&self) -> &str {
            &self.id
        }
        fn is_running(&self) -> bool {
            self.running
        }
        async fn accept_task(&self, _task: Task) -> bool {
            true
        }
        async fn cancel(&self, _task_id: TaskId) -> bool {
            true
        }
    }

    fn candidate(id: &str, cpu_load: f64, tasks_processing: u32, max_concurrency: u32) -> Candidate {
        Candidate {
            handle: Arc::new(StubWorker {
                id: id.to_string(),
                running: true,
            }),
            max_concurrency,
            status: NodeStatus {
                node_id: id.to_string(),
                cpu_load,
                memory_used: 0,
                tasks_queued: 0,
                tasks_processing,
                health_indicators: [90, 90, 90],
                last_heartbeat: Utc::now(),
            },
        }
    }

    fn task(task_type: &str, deadline_secs: i64) -> Task {
        Task::new(
            task_type,
            serde_json::json!({}),
            Utc::now() + Duration::seconds(deadline_secs),
            5,
            "alice",
        )
    }

    #[test]
    fn selects_higher_health_score_among_equally_loaded_candidates() {
        let policy = PlacementPolicy::default();
        let task = task("compute", 60);
        let candidates = vec![candidate("a", 80.0, 0, 5), candidate("b", 10.0, 0, 5)];
        let chosen = policy.select(&task, &candidates, Utc::now()).unwrap();
        assert_eq!(chosen.id(), "b");
    }

    #[test]
    fn rejects_candidate_at_capacity() {
        let policy = PlacementPolicy::default();
        let task = task("compute", 60);
        let candidates = vec![candidate("a", 10.0, 5, 5)];
        assert!(policy.select(&task, &candidates, Utc::now()).is_none());
    }

    #[test]
    fn rejects_candidate_without_enough_deadline_slack() {
        let policy = PlacementPolicy::default();
        // deadline already in the past
        let task = task("compute", -1);
        let candidates = vec![candidate("a", 10.0, 0, 5)];
        assert!(policy.select(&task, &candidates, Utc::now()).is_none());
    }

    #[test]
    fn ties_broken_by_worker_id() {
        let policy = PlacementPolicy::default();
        let task = task("other", 60);
        let candidates = vec![candidate("zzz", 10.0, 0, 5), candidate("aaa", 10.0, 0, 5)];
        let chosen = policy.select(&task, &candidates, Utc::now()).unwrap();
        assert_eq!(chosen.id(), "aaa");
    }
}
