//! Daemon startup and main loop for JXR Cleaner
//!
//! Wires the scheduler context, watcher, conversion worker and control server
//! together and runs them until shutdown.

use crate::busy_gate::BusyGate;
use crate::config::{Config, ConfigError};
use crate::context::SchedulerContext;
use crate::control_server::{bind_control_listener, run_control_server, ControlState, ServerError};
use crate::convert::{
    ConvertError, ConvertReport, Converter, JxrCodec, JxrConverter, UltraHdrEncoder,
};
use crate::convert::pipeline::HdrSettings;
use crate::readiness::ExclusiveOpenProbe;
use crate::replace::remove_orphans;
use crate::scan::{find_orphan_temps, ExtensionRule};
use crate::startup::{run_startup_checks, StartupError};
use crate::watcher::watch_directory;
use crate::worker::{Worker, WorkerSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Control server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Single-file conversion failed
    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

/// How a daemon run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ran until shutdown was requested.
    Stopped,
    /// Another instance owns the control address; nothing was started.
    AlreadyRunning,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Resolved watch root
    pub root: PathBuf,
    ctx: Arc<SchedulerContext>,
    converter: Arc<dyn Converter>,
}

/// Build the converter described by the configuration.
///
/// HDR sources are written as Ultra HDR JPEG.
pub fn build_converter(config: &Config) -> JxrConverter {
    JxrConverter::new(
        Arc::new(JxrCodec::default()),
        extension_rule(config),
        HdrSettings::from(&config.hdr),
    )
    .with_gain_map_encoder(Arc::new(UltraHdrEncoder))
}

fn extension_rule(config: &Config) -> ExtensionRule {
    ExtensionRule::new(&config.watch.source_extension, &config.watch.output_extension)
}

/// Convert one file synchronously, bypassing the scheduler.
pub fn convert_single(config: &Config, path: &Path) -> Result<ConvertReport, DaemonError> {
    let report = build_converter(config).convert(path, config.worker.jpeg_quality)?;
    Ok(report)
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file (defaults if the file is absent)
    /// 2. Apply environment overrides
    /// 3. Run startup checks and resolve the watch root
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load_or_default(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        let root = run_startup_checks(&config)?;
        let ctx = Arc::new(SchedulerContext::new(extension_rule(&config)));
        let converter = Arc::new(build_converter(&config));

        Ok(Self {
            config,
            root,
            ctx,
            converter,
        })
    }

    /// Replace the converter, e.g. with a different codec.
    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    /// Shared scheduler context
    pub fn context(&self) -> Arc<SchedulerContext> {
        self.ctx.clone()
    }

    /// Run the daemon until shutdown
    ///
    /// Starts the control server (single-instance check), watcher and worker,
    /// removes orphaned temp outputs, and waits for every task to finish.
    pub async fn run(self) -> Result<RunOutcome, DaemonError> {
        let listener = if self.config.control.enabled {
            match bind_control_listener(self.config.control.listen).await {
                Ok(listener) => Some(listener),
                Err(ServerError::AlreadyRunning(addr)) => {
                    info!(%addr, "another instance is already running");
                    return Ok(RunOutcome::AlreadyRunning);
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        info!(
            root = %self.root.display(),
            source_extension = %self.ctx.rule.source,
            output_extension = %self.ctx.rule.output,
            "daemon starting"
        );

        let watcher = tokio::spawn(watch_directory(self.ctx.clone(), self.root.clone()));

        let worker = Worker::new(
            self.ctx.clone(),
            BusyGate::from_config(&self.config.busy_gate),
            Arc::new(ExclusiveOpenProbe),
            self.converter.clone(),
            WorkerSettings::from(&self.config.worker),
        );
        let worker = tokio::spawn(worker.run());

        let server = listener.map(|listener| {
            let state = ControlState {
                ctx: self.ctx.clone(),
                root: self.root.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = run_control_server(listener, state).await {
                    error!(error = %e, "control server error");
                }
            })
        });

        let signals = tokio::spawn(shutdown_on_signal(self.ctx.clone()));

        self.start_orphan_cleanup();

        for (name, handle) in [("watcher", watcher), ("worker", worker)] {
            join_task(name, handle).await;
        }
        // The worker or watcher may stop on its own; make sure the rest follows.
        self.ctx.shutdown();
        if let Some(server) = server {
            join_task("control server", server).await;
        }
        join_task("signal handler", signals).await;

        info!("daemon stopped");
        Ok(RunOutcome::Stopped)
    }

    /// Delete `<stem>.tmp.<ext>` files left by an interrupted conversion.
    fn start_orphan_cleanup(&self) {
        let root = self.root.clone();
        let rule = self.ctx.rule.clone();
        tokio::task::spawn_blocking(move || {
            let orphans = find_orphan_temps(&root, &rule);
            if orphans.is_empty() {
                return;
            }
            let removed = remove_orphans(&orphans);
            info!(removed, found = orphans.len(), "removed orphaned temp files");
        });
    }
}

/// Wait for a spawned task, logging a panic or abort. Returns whether it ended cleanly.
async fn join_task(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task = name, error = %e, "task ended abnormally");
            false
        }
    }
}

/// Shut the scheduler down on Ctrl-C or SIGTERM
async fn shutdown_on_signal(ctx: Arc<SchedulerContext>) {
    tokio::select! {
        _ = wait_for_signal() => {
            info!("shutdown signal received");
            ctx.shutdown();
        }
        _ = ctx.shutdown_token().cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
