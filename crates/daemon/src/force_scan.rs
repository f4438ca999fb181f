//! Force-scan trigger: immediate full sweep with the busy gate suspended.

use crate::context::SchedulerContext;
use crate::watcher::enqueue_full_scan;
use std::path::Path;
use tracing::info;

/// Start a force-run session, wake the worker, and enqueue every unconverted
/// source under `root`. Returns the number of files queued.
///
/// The session ends on its own once the worker finds the queue empty.
pub fn force_scan(ctx: &SchedulerContext, root: &Path) -> usize {
    ctx.begin_force_run();
    ctx.wake_worker();

    let queued = enqueue_full_scan(ctx, root);
    info!(queued, root = %root.display(), "force scan queued files");
    queued
}
