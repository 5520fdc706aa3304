//! Clock & periodic ticker: a monotonic-time source and a reusable periodic
//! callback runner for the two control loops (placement tick, heartbeat audit).
//!
//! Grounded in the host codebase's cron-style scheduler loop: an `AtomicBool`
//! running flag, a spawned task polling a `tokio::time::interval`, and a
//! `stop()` that flips the flag and joins the handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// Current wall-clock instant. A thin wrapper so call sites read as "the clock"
/// rather than reaching for `chrono::Utc::now()` directly, and so a future
/// deterministic-clock test harness has one seam to replace.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Runs a callback on a fixed period until stopped. One ticker per control loop.
pub struct PeriodicTicker {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for PeriodicTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodicTicker {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the tick loop. `callback` is invoked once per period until `stop`
    /// is called; it is not invoked concurrently with itself.
    pub fn start<F, Fut>(&self, period: StdDuration, mut callback: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                callback().await;
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stops the loop and awaits its current iteration finishing.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
