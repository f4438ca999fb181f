//! Tracing subscriber setup and log file maintenance.
//!
//! Filter priority, highest first:
//!
//! 1. `JXR_CLEANER_LOG` env var (per-target directives, e.g. `jxr_cleaner=debug,warn`)
//! 2. `RUST_LOG` env var
//! 3. `--verbose` → `debug`, otherwise `info`
//!
//! Logs go to stderr and, when a log file is configured, are appended to it
//! without ANSI colors.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default directive when no env var is set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    if let Ok(directives) = std::env::var("JXR_CLEANER_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(default_directive(verbose))
}

/// Keep only the last `max_lines` lines of the log at `path`.
///
/// A missing file is not an error.
pub fn trim_log(path: &Path, max_lines: usize) -> io::Result<()> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return Ok(());
    }

    let mut kept = lines[lines.len() - max_lines..].join("\n");
    if !kept.is_empty() {
        kept.push('\n');
    }
    fs::write(path, kept)
}

/// Open the log file for appending, creating its directory if needed.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber.
///
/// With `log_file`, the file is trimmed to `max_lines` first and then
/// appended to. A second call is a no-op.
pub fn init_logging(verbose: bool, log_file: Option<&Path>, max_lines: usize) -> io::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            trim_log(path, max_lines)?;
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    let stderr_is_tty = io::IsTerminal::is_terminal(&io::stderr());
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(verbose);

    // Ignore "already initialized" so tests and repeated setup do not fail.
    let _ = tracing_subscriber::registry()
        .with(build_env_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_trim_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let content: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        fs::write(&path, content).unwrap();

        trim_log(&path, 3).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line 8\nline 9\nline 10\n");
    }

    #[test]
    fn test_trim_short_log_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, "only line").unwrap();

        trim_log(&path, 500).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "only line");
    }

    #[test]
    fn test_trim_missing_log_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(trim_log(&dir.path().join("absent.txt"), 500).is_ok());
    }

    #[test]
    fn test_trim_to_zero_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, "a\nb\n").unwrap();

        trim_log(&path, 0).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("jxr-cleaner").join("log.txt");

        let file = open_log_file(&path).unwrap();
        drop(file);

        assert!(path.exists());
    }
}
