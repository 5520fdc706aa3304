//! Entry point for the scheduler demo binary.
//!
//! Wires a [`scheduler_kernel::Scheduler`] to a [`scheduler_policy::RuleBasedPolicyGate`]
//! and a handful of [`scheduler_worker::WorkerRuntime`]s, submits a batch of tasks, lets
//! the control loops run for a while, and reports the outcome. A thin demo binary for
//! manual and integration-test use, not a production operator interface.

mod cli;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scheduler_kernel::{PolicyGate, Principal, Scheduler, SchedulerConfig, SubmitRequest};
use scheduler_policy::RuleBasedPolicyGate;
use scheduler_worker::{CompletionSink, TaskHandler, WorkerConfig, WorkerRuntime};

use crate::cli::{Cli, Commands};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Demo work function: echoes the payload back after a short, payload-sized delay,
/// standing in for whatever real handler a deployment would register per task type.
struct DemoHandler;

#[async_trait::async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, task: &scheduler_kernel::Task) -> std::result::Result<serde_json::Value, String> {
        let busy_ms = 10 + (task.payload.to_string().len() as u64 % 30);
        tokio::time::sleep(StdDuration::from_millis(busy_ms)).await;
        Ok(task.payload.clone())
    }
}

/// The demo principal used to submit and observe tasks; a real deployment would
/// derive this from a verified credential token via the `PolicyGate` boundary.
fn demo_principal() -> Principal {
    Principal {
        user_id: "demo-operator".into(),
        roles: vec!["user".into()],
        token: "demo-token".into(),
        token_expiry: Utc::now() + Duration::hours(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            workers,
            worker_capacity,
            tasks,
            deadline_secs,
            run_secs,
        } => {
            run_demo(workers, worker_capacity, tasks, deadline_secs, run_secs).await?;
        }
    }

    Ok(())
}

async fn run_demo(
    worker_count: u32,
    worker_capacity: u32,
    task_count: u32,
    deadline_secs: i64,
    run_secs: u64,
) -> Result<()> {
    let policy: Arc<dyn PolicyGate> = Arc::new(RuleBasedPolicyGate::with_defaults());
    let scheduler = Scheduler::new(policy, SchedulerConfig::default());
    scheduler.start();

    let mut workers = Vec::with_capacity(worker_count as usize);
    for i in 0..worker_count {
        let sink: Arc<dyn CompletionSink> = Arc::new(scheduler.clone());
        let worker = WorkerRuntime::new(format!("worker-{i}"), worker_capacity, sink, WorkerConfig::default())?;
        worker.register_handler("compute", Arc::new(DemoHandler));
        worker.register_handler("io", Arc::new(DemoHandler));
        worker.start();
        scheduler.register_worker(Arc::new(worker.clone()), worker_capacity);
        workers.push(worker);
    }
    info!(workers = worker_count, capacity = worker_capacity, "worker fleet registered");

    let principal = demo_principal();
    let mut submitted = Vec::with_capacity(task_count as usize);
    for i in 0..task_count {
        let task_type = if i % 3 == 0 { "io" } else { "compute" };
        let id = scheduler
            .submit(
                SubmitRequest {
                    task_type: task_type.into(),
                    payload: serde_json::json!({ "seq": i }),
                    deadline: Utc::now() + Duration::seconds(deadline_secs),
                    priority: (i % 10) as u8,
                },
                &principal,
            )
            .await?;
        submitted.push(id);
    }
    info!(tasks = task_count, "batch submitted");

    tokio::time::sleep(StdDuration::from_secs(run_secs)).await;

    let still_pending = submitted
        .iter()
        .filter(|id| scheduler.get_task(**id).map(|t| t.assigned_to.is_none() && t.completed_at.is_none()).unwrap_or(false))
        .count();

    println!("submitted:            {task_count}");
    println!("total_completed:      {}", scheduler.total_completed());
    println!("completed_on_time:    {}", scheduler.completed_on_time());
    println!("deadline_satisfaction: {:.3}", scheduler.deadline_satisfaction_rate());
    println!("still_pending:        {still_pending}");

    for worker in &workers {
        worker.stop().await;
    }
    scheduler.shutdown().await;

    Ok(())
}
