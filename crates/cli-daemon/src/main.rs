//! CLI entry point for JXR Cleaner
//!
//! Without arguments, runs the background daemon. With `--convert <file>`,
//! converts that one file and exits.

use clap::Parser;
use jxr_cleaner::logging::init_logging;
use jxr_cleaner::{convert_single, Config, Daemon, RunOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// JXR Cleaner - replaces JPEG XR captures with JPEG / Ultra HDR JPEG
#[derive(Parser, Debug)]
#[command(name = "jxr-cleaner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Convert a single file synchronously and exit
    #[arg(short = 'c', long, value_name = "FILE")]
    convert: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("jxr-cleaner").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);

    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let log_file = config.log.resolved_file();
    if let Err(e) = init_logging(args.verbose, Some(&log_file), config.log.max_lines) {
        eprintln!("Cannot open log file {}: {}", log_file.display(), e);
        if let Err(e) = init_logging(args.verbose, None, config.log.max_lines) {
            eprintln!("Cannot initialize logging: {}", e);
        }
    }

    match args.convert {
        Some(path) => convert_one(&config, path, &log_file).await,
        None => run_daemon(config, &config_path).await,
    }
}

async fn convert_one(config: &Config, path: PathBuf, log_file: &std::path::Path) -> ExitCode {
    let config = config.clone();
    let source = path.clone();
    let result = tokio::task::spawn_blocking(move || convert_single(&config, &source)).await;

    match result {
        Ok(Ok(report)) => {
            info!(
                source = %path.display(),
                output = %report.replace.output().display(),
                kind = ?report.kind,
                "converted"
            );
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!(source = %path.display(), error = %e, "conversion failed");
            eprintln!(
                "Could not convert {}. See {} for details.",
                path.display(),
                log_file.display()
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(source = %path.display(), error = %e, "conversion task panicked");
            ExitCode::FAILURE
        }
    }
}

async fn run_daemon(config: Config, config_path: &std::path::Path) -> ExitCode {
    info!(config = %config_path.display(), "JXR Cleaner starting");

    let daemon = match Daemon::with_config(config) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    if daemon.config.control.enabled {
        info!(
            "control server on http://{}/status",
            daemon.config.control.listen
        );
    }

    match daemon.run().await {
        Ok(RunOutcome::Stopped) | Ok(RunOutcome::AlreadyRunning) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon error");
            ExitCode::FAILURE
        }
    }
}
