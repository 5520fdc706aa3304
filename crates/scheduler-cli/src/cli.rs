//! CLI argument definitions for the scheduler demo binary.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! wiring the scheduler, a policy gate, and a handful of workers together.

use clap::{Parser, Subcommand};

/// scheduler-demo -- a minimal end-to-end wiring of the distributed task scheduler.
#[derive(Parser)]
#[command(
    name = "scheduler-demo",
    version,
    about = "Distributed task scheduler -- demo binary",
    long_about = "Wires the scheduler core, a rule-based PolicyGate, and a pool of \
                  in-process worker runtimes together, then submits a batch of tasks \
                  and reports how they were placed and completed."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a batch of tasks against a fresh in-process fleet and report the outcome.
    Run {
        /// Number of worker nodes to register.
        #[arg(long, default_value_t = 3)]
        workers: u32,

        /// Max concurrent tasks per worker.
        #[arg(long, default_value_t = 4)]
        worker_capacity: u32,

        /// Number of tasks to submit.
        #[arg(long, default_value_t = 20)]
        tasks: u32,

        /// Deadline given to each submitted task, in seconds from submission.
        #[arg(long, default_value_t = 10)]
        deadline_secs: i64,

        /// How long to let the fleet run after submission before reporting, in seconds.
        #[arg(long, default_value_t = 3)]
        run_secs: u64,
    },
}
