//! Conversion worker: the single consumer of the work queue.
//!
//! Each iteration waits for an item, consults the busy gate (unless a
//! force-run session is active), checks that the file is no longer held by its
//! producer, and hands it to the converter. Failed items are not re-queued;
//! they stay on disk until a later scan finds them again.

use crate::busy_gate::BusyGate;
use crate::context::SchedulerContext;
use crate::convert::{Converter, ImageKind};
use crate::readiness::{wait_until_ready, Readiness, ReadinessProbe};
use crate::retry::RetryPolicy;
use jxr_cleaner_config::WorkerConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Terminal state of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    /// The output already exists; nothing to do.
    SkippedAlreadyConverted,
    /// The file stayed locked, vanished, or could not be opened.
    SkippedUnready { reason: String },
    Failed { error: String },
}

/// Timing and quality settings for the worker loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Queue wait after which the worker counts as idle and ends a force-run session.
    pub idle_timeout: Duration,
    /// Park time after deferring an item because the system is busy.
    pub busy_retry: Duration,
    pub readiness: RetryPolicy,
    pub jpeg_quality: u8,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            busy_retry: Duration::from_secs(config.busy_retry_secs),
            readiness: RetryPolicy::new(
                config.readiness_attempts,
                Duration::from_secs(config.readiness_delay_secs),
            ),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

pub struct Worker {
    ctx: Arc<SchedulerContext>,
    gate: BusyGate,
    probe: Arc<dyn ReadinessProbe>,
    converter: Arc<dyn Converter>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        ctx: Arc<SchedulerContext>,
        gate: BusyGate,
        probe: Arc<dyn ReadinessProbe>,
        converter: Arc<dyn Converter>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            ctx,
            gate,
            probe,
            converter,
            settings,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        info!("conversion worker started");

        loop {
            let Some(path) = self.ctx.queue.wait_pop(self.settings.idle_timeout).await else {
                if self.ctx.is_shutting_down() {
                    break;
                }
                if self.ctx.force_run_active() {
                    info!("queue drained, force-run session ended");
                    self.ctx.end_force_run();
                }
                continue;
            };

            if !self.ctx.force_run_active() && self.defer_if_busy(path.clone()).await {
                if self.ctx.is_shutting_down() {
                    break;
                }
                continue;
            }

            let Some(outcome) = self.process(&path).await else {
                break;
            };
            self.ctx.stats.record(&outcome);
        }

        info!("conversion worker stopped");
    }

    /// If the system is busy, put `path` back at the head of the queue and park
    /// until woken, shut down, or the retry delay passes. Returns whether the
    /// item was deferred.
    async fn defer_if_busy(&mut self, path: PathBuf) -> bool {
        let sample = self.gate.check().await;
        self.ctx.stats.set_last_cpu(sample.cpu_percent);
        if !sample.busy {
            return false;
        }

        debug!(
            path = %path.display(),
            exclusive_app = sample.exclusive_app,
            cpu_percent = ?sample.cpu_percent,
            "system busy, deferring"
        );
        self.ctx.stats.record_deferral();
        self.ctx.queue.push_front(path);

        tokio::select! {
            _ = self.ctx.shutdown_token().cancelled() => {}
            _ = self.ctx.woken() => debug!("worker woken"),
            _ = tokio::time::sleep(self.settings.busy_retry) => {}
        }
        true
    }

    /// Take one item to a terminal outcome. `None` means shutdown interrupted it.
    async fn process(&self, path: &Path) -> Option<ConversionOutcome> {
        if self.ctx.rule.has_counterpart(path) {
            debug!(path = %path.display(), "already converted");
            return Some(ConversionOutcome::SkippedAlreadyConverted);
        }

        let readiness = wait_until_ready(
            self.probe.as_ref(),
            path,
            self.settings.readiness,
            self.ctx.shutdown_token(),
        )
        .await;
        match readiness {
            Readiness::Ready => {}
            Readiness::Cancelled => return None,
            Readiness::Missing => {
                debug!(path = %path.display(), "file disappeared before conversion");
                return Some(ConversionOutcome::SkippedUnready {
                    reason: "file no longer exists".to_string(),
                });
            }
            Readiness::Unready(reason) => {
                warn!(path = %path.display(), %reason, "skipping file that is not ready");
                return Some(ConversionOutcome::SkippedUnready { reason });
            }
        }

        if !path.exists() {
            return Some(ConversionOutcome::SkippedUnready {
                reason: "file no longer exists".to_string(),
            });
        }

        Some(self.dispatch(path.to_path_buf()).await)
    }

    async fn dispatch(&self, path: PathBuf) -> ConversionOutcome {
        info!(path = %path.display(), "converting");
        let converter = Arc::clone(&self.converter);
        let quality = self.settings.jpeg_quality;
        let task_path = path.clone();
        let result =
            tokio::task::spawn_blocking(move || converter.convert(&task_path, quality)).await;

        match result {
            Ok(Ok(report)) => {
                if report.kind == ImageKind::Hdr {
                    debug!(path = %path.display(), "wrote gain-map output");
                }
                ConversionOutcome::Converted
            }
            Ok(Err(e)) => {
                error!(path = %path.display(), error = %e, "conversion failed");
                ConversionOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "conversion task panicked");
                ConversionOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
