//! Status module for JXR Cleaner
//!
//! Provides outcome counters shared between the worker and the control server,
//! and the JSON status snapshot served at `GET /status`.

use crate::context::SchedulerContext;
use crate::worker::ConversionOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Outcome counters updated by the worker.
#[derive(Debug, Default)]
pub struct ConversionStats {
    converted: AtomicU64,
    skipped_already_converted: AtomicU64,
    skipped_unready: AtomicU64,
    failed: AtomicU64,
    deferred_busy: AtomicU64,
    last_cpu_percent: Mutex<Option<f32>>,
}

impl ConversionStats {
    /// Count a terminal outcome.
    pub fn record(&self, outcome: &ConversionOutcome) {
        let counter = match outcome {
            ConversionOutcome::Converted => &self.converted,
            ConversionOutcome::SkippedAlreadyConverted => &self.skipped_already_converted,
            ConversionOutcome::SkippedUnready { .. } => &self.skipped_unready,
            ConversionOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an item deferred by the busy gate.
    pub fn record_deferral(&self) {
        self.deferred_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_cpu(&self, cpu_percent: Option<f32>) {
        if let Some(cpu) = cpu_percent {
            *self
                .last_cpu_percent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cpu);
        }
    }

    pub fn counters(&self) -> OutcomeCounters {
        OutcomeCounters {
            converted: self.converted.load(Ordering::Relaxed),
            skipped_already_converted: self.skipped_already_converted.load(Ordering::Relaxed),
            skipped_unready: self.skipped_unready.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deferred_busy: self.deferred_busy.load(Ordering::Relaxed),
        }
    }

    pub fn last_cpu(&self) -> Option<f32> {
        *self
            .last_cpu_percent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Totals per outcome since startup
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeCounters {
    pub converted: u64,
    pub skipped_already_converted: u64,
    pub skipped_unready: u64,
    pub failed: u64,
    pub deferred_busy: u64,
}

/// Point-in-time status of the scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub queue_len: usize,
    pub force_run_active: bool,
    pub shutting_down: bool,
    pub outcomes: OutcomeCounters,
    pub last_cpu_percent: Option<f32>,
}

impl StatusSnapshot {
    /// Collects the current status from the shared context
    pub fn collect(ctx: &SchedulerContext) -> Self {
        Self {
            timestamp_unix_ms: timestamp_ms(),
            queue_len: ctx.queue.len(),
            force_run_active: ctx.force_run_active(),
            shutting_down: ctx.is_shutting_down(),
            outcomes: ctx.stats.counters(),
            last_cpu_percent: ctx.stats.last_cpu(),
        }
    }
}

/// Get current timestamp in milliseconds
fn timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ExtensionRule;
    use std::path::PathBuf;

    #[test]
    fn test_record_counts_each_outcome() {
        let stats = ConversionStats::default();
        stats.record(&ConversionOutcome::Converted);
        stats.record(&ConversionOutcome::Converted);
        stats.record(&ConversionOutcome::SkippedAlreadyConverted);
        stats.record(&ConversionOutcome::SkippedUnready {
            reason: "locked".to_string(),
        });
        stats.record(&ConversionOutcome::Failed {
            error: "decode".to_string(),
        });
        stats.record_deferral();

        assert_eq!(
            stats.counters(),
            OutcomeCounters {
                converted: 2,
                skipped_already_converted: 1,
                skipped_unready: 1,
                failed: 1,
                deferred_busy: 1,
            }
        );
    }

    #[test]
    fn test_last_cpu_keeps_previous_on_none() {
        let stats = ConversionStats::default();
        assert_eq!(stats.last_cpu(), None);
        stats.set_last_cpu(Some(12.5));
        stats.set_last_cpu(None);
        assert_eq!(stats.last_cpu(), Some(12.5));
    }

    #[test]
    fn test_snapshot_reflects_context() {
        let ctx = SchedulerContext::new(ExtensionRule::new("jxr", "jpg"));
        ctx.queue.push(PathBuf::from("/captures/a.jxr"));
        ctx.queue.push(PathBuf::from("/captures/b.jxr"));
        ctx.begin_force_run();
        ctx.stats.record(&ConversionOutcome::Converted);

        let snapshot = StatusSnapshot::collect(&ctx);
        assert_eq!(snapshot.queue_len, 2);
        assert!(snapshot.force_run_active);
        assert!(!snapshot.shutting_down);
        assert_eq!(snapshot.outcomes.converted, 1);
        // Should be a reasonable timestamp (after year 2020)
        assert!(snapshot.timestamp_unix_ms > 1577836800000);
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let snapshot = StatusSnapshot {
            timestamp_unix_ms: 1,
            queue_len: 3,
            force_run_active: true,
            shutting_down: false,
            outcomes: OutcomeCounters::default(),
            last_cpu_percent: None,
        };
        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["queue_len"], 3);
        assert_eq!(json["force_run_active"], true);
        assert_eq!(json["outcomes"]["converted"], 0);
        assert!(json["last_cpu_percent"].is_null());
    }
}
