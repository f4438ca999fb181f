//! Readiness checking: is a newly created file still held open by its producer?
//!
//! A file is ready once it can be opened for exclusive access. Lock conflicts
//! are retried a bounded number of times; a missing file or any other open
//! error abandons the item immediately.

use crate::retry::{retry_with_delay, Attempt, RetryError, RetryPolicy};
use std::fs::File;
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a single exclusive-open probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    Ready,
    /// Another process holds the file (sharing violation or lock conflict).
    Locked,
    Missing,
    Failed(io::Error),
}

/// Probes a file for exclusive access.
pub trait ReadinessProbe: Send + Sync {
    fn probe(&self, path: &Path) -> ProbeOutcome;
}

/// Default probe: opens the file and takes an exclusive, non-blocking lock.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveOpenProbe;

impl ReadinessProbe for ExclusiveOpenProbe {
    fn probe(&self, path: &Path) -> ProbeOutcome {
        match open_exclusive(path) {
            Ok(_file) => ProbeOutcome::Ready,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ProbeOutcome::Missing,
            Err(e) if is_lock_conflict(&e) => ProbeOutcome::Locked,
            Err(e) => ProbeOutcome::Failed(e),
        }
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = File::open(path)?;
    // SAFETY: the descriptor is owned by `file` and valid for the duration of the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // The lock is released when `file` is dropped.
    Ok(file)
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .share_mode(0)
        .open(path)
}

#[cfg(not(any(unix, windows)))]
fn open_exclusive(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(unix)]
fn is_lock_conflict(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN)
}

#[cfg(windows)]
fn is_lock_conflict(e: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(e.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(any(unix, windows)))]
fn is_lock_conflict(_e: &io::Error) -> bool {
    false
}

/// Outcome of the bounded readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The file disappeared before it could be opened.
    Missing,
    /// The file stayed locked, or could not be opened.
    Unready(String),
    /// Shutdown was signalled while waiting between probes.
    Cancelled,
}

/// Why a probe did not succeed.
#[derive(Debug)]
enum NotReady {
    Locked,
    Missing,
    Open(io::Error),
}

/// Probe `path` until it is ready, retrying lock conflicts per `policy`.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    path: &Path,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Readiness {
    let result = retry_with_delay(policy, cancel, |attempt| {
        let outcome = probe.probe(path);
        async move {
            match outcome {
                ProbeOutcome::Ready => Attempt::Ready(()),
                ProbeOutcome::Locked => {
                    debug!(path = %path.display(), attempt, "file is locked, waiting");
                    Attempt::Retry(NotReady::Locked)
                }
                ProbeOutcome::Missing => Attempt::Abandon(NotReady::Missing),
                ProbeOutcome::Failed(e) => Attempt::Abandon(NotReady::Open(e)),
            }
        }
    })
    .await;

    match result {
        Ok(()) => Readiness::Ready,
        Err(RetryError::Cancelled) => Readiness::Cancelled,
        Err(RetryError::Abandoned(NotReady::Missing)) => Readiness::Missing,
        Err(RetryError::Abandoned(NotReady::Open(e))) => {
            Readiness::Unready(format!("cannot open file: {}", e))
        }
        Err(RetryError::Abandoned(NotReady::Locked)) => {
            Readiness::Unready("file is locked by another process".to_string())
        }
        Err(RetryError::Exhausted { attempts, .. }) => Readiness::Unready(format!(
            "file is locked by another process after {} attempts",
            attempts
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Probe that replays a script of outcomes, then reports Ready.
    pub(crate) struct ScriptedProbe {
        script: Mutex<Vec<ProbeOutcome>>,
        pub calls: AtomicU32,
    }

    impl ScriptedProbe {
        pub(crate) fn new(mut script: Vec<ProbeOutcome>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn always_locked() -> Self {
            Self::new((0..1000).map(|_| ProbeOutcome::Locked).collect())
        }
    }

    impl ReadinessProbe for ScriptedProbe {
        fn probe(&self, _path: &Path) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(ProbeOutcome::Ready)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_then_ready() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Locked, ProbeOutcome::Locked]);
        let cancel = CancellationToken::new();
        let result = wait_until_ready(&probe, Path::new("/captures/a.jxr"), policy(), &cancel).await;

        assert_eq!(result, Readiness::Ready);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_past_attempts_is_unready() {
        let probe = ScriptedProbe::always_locked();
        let cancel = CancellationToken::new();
        let result = wait_until_ready(&probe, Path::new("/captures/a.jxr"), policy(), &cancel).await;

        assert!(matches!(result, Readiness::Unready(reason) if reason.contains("5 attempts")));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_abandons_immediately() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Missing]);
        let cancel = CancellationToken::new();
        let result = wait_until_ready(&probe, Path::new("/captures/a.jxr"), policy(), &cancel).await;

        assert_eq!(result, Readiness::Missing);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_abandons_immediately() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Failed(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "access denied",
        ))]);
        let cancel = CancellationToken::new();
        let result = wait_until_ready(&probe, Path::new("/captures/a.jxr"), policy(), &cancel).await;

        assert!(matches!(result, Readiness::Unready(reason) if reason.contains("access denied")));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let probe = ScriptedProbe::always_locked();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = wait_until_ready(&probe, Path::new("/captures/a.jxr"), policy(), &cancel).await;

        assert_eq!(result, Readiness::Cancelled);
    }

    #[test]
    fn test_exclusive_probe_on_plain_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.jxr");
        std::fs::write(&path, b"data").unwrap();

        assert!(matches!(ExclusiveOpenProbe.probe(&path), ProbeOutcome::Ready));
    }

    #[test]
    fn test_exclusive_probe_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.jxr");

        assert!(matches!(ExclusiveOpenProbe.probe(&path), ProbeOutcome::Missing));
    }

    #[cfg(unix)]
    #[test]
    fn test_exclusive_probe_sees_held_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("busy.jxr");
        std::fs::write(&path, b"data").unwrap();

        let holder = open_exclusive(&path).unwrap();
        assert!(matches!(ExclusiveOpenProbe.probe(&path), ProbeOutcome::Locked));
        drop(holder);
        assert!(matches!(ExclusiveOpenProbe.probe(&path), ProbeOutcome::Ready));
    }
}
