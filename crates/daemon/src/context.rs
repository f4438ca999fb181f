//! Shared scheduler state passed to the watcher, the worker and the control server.

use crate::metrics::ConversionStats;
use crate::queue::WorkQueue;
use crate::scan::ExtensionRule;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// State shared by every long-running task of the daemon.
#[derive(Debug)]
pub struct SchedulerContext {
    /// Files waiting for conversion.
    pub queue: WorkQueue<PathBuf>,
    /// Which files are sources and where their outputs land.
    pub rule: ExtensionRule,
    /// Outcome counters and last busy-gate sample.
    pub stats: ConversionStats,
    force_run: AtomicBool,
    wake: Notify,
    shutdown: CancellationToken,
}

impl SchedulerContext {
    pub fn new(rule: ExtensionRule) -> Self {
        Self {
            queue: WorkQueue::new(),
            rule,
            stats: ConversionStats::default(),
            force_run: AtomicBool::new(false),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether a force-run session is bypassing the busy gate.
    pub fn force_run_active(&self) -> bool {
        self.force_run.load(Ordering::Relaxed)
    }

    pub fn begin_force_run(&self) {
        self.force_run.store(true, Ordering::Relaxed);
    }

    /// Ends the force-run session. Called by the worker when the queue runs dry.
    pub fn end_force_run(&self) {
        self.force_run.store(false, Ordering::Relaxed);
    }

    /// Wake the worker if it is parked after a busy deferral.
    ///
    /// A wake sent while the worker is not parked is remembered for its next park.
    pub fn wake_worker(&self) {
        self.wake.notify_one();
    }

    /// Resolves on the next [`SchedulerContext::wake_worker`].
    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Signal shutdown to every task. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.queue.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown, for use in `select!` and retry loops.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
