//! Startup checks module for JXR Cleaner
//!
//! Provides preflight checks run before the daemon starts its tasks:
//! - Watch root resolution
//! - Quality and threshold ranges
//! - Source/output extension sanity

use crate::config::Config;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("No watch root configured and no Videos folder could be found; set [watch] root")]
    NoWatchRoot,

    #[error("Invalid {name}: {value} (must be 0-100)")]
    InvalidQuality { name: &'static str, value: u8 },

    #[error("Invalid CPU threshold: {0} (must be between 0 and 100)")]
    InvalidCpuThreshold(f32),

    #[error("Invalid extensions: {0}")]
    InvalidExtensions(String),

    #[error("Invalid {name}: {value}s (must be between 1 and 86400)")]
    InvalidInterval { name: &'static str, value: u64 },

    #[error("Invalid {name}: {value} (must be a positive number of nits)")]
    InvalidWhiteLevel { name: &'static str, value: f32 },
}

/// Upper bound for worker timing settings, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Resolve the directory to watch: `[watch] root`, else the user's Videos folder.
///
/// Only resolution is checked here. A root that does not exist stops the
/// watcher, not the daemon.
pub fn resolve_watch_root(cfg: &Config) -> Result<PathBuf, StartupError> {
    cfg.watch.resolved_root().ok_or(StartupError::NoWatchRoot)
}

/// Check a JPEG quality value
pub fn check_quality(name: &'static str, value: u8) -> Result<(), StartupError> {
    if value > 100 {
        return Err(StartupError::InvalidQuality { name, value });
    }
    Ok(())
}

/// Check the busy-gate CPU threshold
pub fn check_cpu_threshold(threshold: f32) -> Result<(), StartupError> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(StartupError::InvalidCpuThreshold(threshold));
    }
    Ok(())
}

/// Check a worker timing setting
///
/// Zero would spin the worker loop; the upper bound keeps deadlines in range.
pub fn check_interval(name: &'static str, value: u64) -> Result<(), StartupError> {
    if !(1..=MAX_INTERVAL_SECS).contains(&value) {
        return Err(StartupError::InvalidInterval { name, value });
    }
    Ok(())
}

/// Check an HDR white level used for rescaling
pub fn check_white_level(name: &'static str, value: f32) -> Result<(), StartupError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(StartupError::InvalidWhiteLevel { name, value });
    }
    Ok(())
}

/// Check that source and output extensions are usable and distinct
///
/// Equal extensions would make every output look like a new source.
pub fn check_extensions(source: &str, output: &str) -> Result<(), StartupError> {
    let source = source.trim_start_matches('.');
    let output = output.trim_start_matches('.');

    if source.is_empty() || output.is_empty() {
        return Err(StartupError::InvalidExtensions(
            "source and output extensions must not be empty".to_string(),
        ));
    }
    if source.eq_ignore_ascii_case(output) {
        return Err(StartupError::InvalidExtensions(format!(
            "source and output extensions are both '{}'",
            source
        )));
    }
    Ok(())
}

/// Run all startup checks in order and return the resolved watch root
///
/// Checks are run in the following order:
/// 1. Extensions
/// 2. Quality values
/// 3. CPU threshold
/// 4. Worker intervals
/// 5. HDR white levels
/// 6. Watch root resolution
pub fn run_startup_checks(cfg: &Config) -> Result<PathBuf, StartupError> {
    check_extensions(&cfg.watch.source_extension, &cfg.watch.output_extension)?;
    check_quality("jpeg_quality", cfg.worker.jpeg_quality)?;
    check_quality("gain_map_quality", cfg.hdr.gain_map_quality)?;
    check_cpu_threshold(cfg.busy_gate.cpu_threshold_percent)?;
    check_interval("idle_timeout_secs", cfg.worker.idle_timeout_secs)?;
    check_interval("busy_retry_secs", cfg.worker.busy_retry_secs)?;
    check_interval("readiness_delay_secs", cfg.worker.readiness_delay_secs)?;
    check_white_level("source_white_nits", cfg.hdr.source_white_nits)?;
    check_white_level("reference_white_nits", cfg.hdr.reference_white_nits)?;
    resolve_watch_root(cfg)
}
