//! Directory watcher: turns filesystem notifications into work items.
//!
//! Notifications come from a [`DirectoryEventStream`]. The production stream
//! wraps `notify::RecommendedWatcher` and bridges its callback into a bounded
//! tokio channel. When that channel fills up, or the backend reports that it
//! dropped events, the stream yields [`WatchBatch::Overflow`] and the watcher
//! falls back to one full recursive scan.

use crate::context::SchedulerContext;
use crate::scan::scan_for_unconverted;
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the channel between the notify callback and the async side.
const CHANNEL_CAPACITY: usize = 1024;

/// How long a single `next_batch` call waits before returning an empty batch.
const BATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for watcher setup.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watch root does not exist or is not a directory.
    #[error("Watch root is not a directory: {0}")]
    RootMissing(PathBuf),

    /// The notification backend could not be started.
    #[error("Failed to start filesystem watcher: {0}")]
    Notify(#[from] notify::Error),
}

/// One read from a [`DirectoryEventStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchBatch {
    /// Paths created or renamed into the tree. Empty on timeout.
    Events(Vec<PathBuf>),
    /// Notifications were lost; the caller should rescan.
    Overflow,
    /// Shutdown was signalled or the stream closed.
    Cancelled,
}

/// Source of directory change notifications.
#[async_trait]
pub trait DirectoryEventStream: Send {
    async fn next_batch(&mut self, timeout: Duration) -> WatchBatch;
}

/// Production event stream backed by `notify`.
pub struct NotifyEventStream {
    rx: mpsc::Receiver<Event>,
    overflow: Arc<AtomicBool>,
    cancel: CancellationToken,
    // Dropping the watcher stops event delivery.
    _watcher: Option<notify::RecommendedWatcher>,
}

/// Sending half used from notify's callback thread.
struct EventForwarder {
    tx: mpsc::Sender<Event>,
    overflow: Arc<AtomicBool>,
    capacity: usize,
}

impl EventForwarder {
    fn forward(&self, res: Result<Event, notify::Error>) {
        match res {
            Ok(event) => {
                if self.tx.try_send(event).is_err() && !self.overflow.swap(true, Ordering::Relaxed) {
                    warn!(
                        capacity = self.capacity,
                        "watcher channel full, falling back to a full rescan"
                    );
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        }
    }
}

impl NotifyEventStream {
    /// Start watching `root` recursively.
    pub fn open(root: &Path, cancel: CancellationToken) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::RootMissing(root.to_path_buf()));
        }

        let (mut stream, forwarder) = Self::unwatched(CHANNEL_CAPACITY, cancel);
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| forwarder.forward(res),
            notify::Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        stream._watcher = Some(watcher);

        Ok(stream)
    }

    /// Stream and forwarder sharing a channel of `capacity`, with no backend attached.
    fn unwatched(capacity: usize, cancel: CancellationToken) -> (Self, EventForwarder) {
        let (tx, rx) = mpsc::channel::<Event>(capacity);
        let overflow = Arc::new(AtomicBool::new(false));
        let forwarder = EventForwarder {
            tx,
            overflow: Arc::clone(&overflow),
            capacity,
        };
        let stream = Self {
            rx,
            overflow,
            cancel,
            _watcher: None,
        };
        (stream, forwarder)
    }

    fn take_overflow(&self) -> bool {
        self.overflow.swap(false, Ordering::Relaxed)
    }
}

#[async_trait]
impl DirectoryEventStream for NotifyEventStream {
    async fn next_batch(&mut self, timeout: Duration) -> WatchBatch {
        if self.take_overflow() {
            return WatchBatch::Overflow;
        }

        let first = tokio::select! {
            _ = self.cancel.cancelled() => return WatchBatch::Cancelled,
            _ = tokio::time::sleep(timeout) => return WatchBatch::Events(Vec::new()),
            event = self.rx.recv() => event,
        };
        let Some(first) = first else {
            warn!("filesystem watcher channel closed");
            return WatchBatch::Cancelled;
        };

        // Drain whatever else is already queued into the same batch.
        let mut events = vec![first];
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }

        if self.take_overflow() || events.iter().any(|event| event.need_rescan()) {
            return WatchBatch::Overflow;
        }

        WatchBatch::Events(events.iter().flat_map(arrived_paths).collect())
    }
}

/// Paths a notification reports as newly present: creations and rename targets.
pub fn arrived_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.clone()
        }
        // Paths are [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        // Backends that cannot tell the two sides of a rename apart.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.exists()).cloned().collect()
        }
        _ => Vec::new(),
    }
}

/// Enqueue every qualifying path of a batch, skipping duplicates and converted sources.
fn enqueue_events(ctx: &SchedulerContext, paths: Vec<PathBuf>) -> usize {
    let mut seen = HashSet::new();
    let mut queued = 0;
    for path in paths {
        if !seen.insert(path.clone()) || !ctx.rule.needs_conversion(&path) {
            continue;
        }
        debug!(path = %path.display(), "new source file detected");
        ctx.queue.push(path);
        queued += 1;
    }
    queued
}

/// Enqueue every unconverted source under `root`.
pub fn enqueue_full_scan(ctx: &SchedulerContext, root: &Path) -> usize {
    let found = scan_for_unconverted(root, &ctx.rule);
    let count = found.len();
    for path in found {
        ctx.queue.push(path);
    }
    count
}

/// Watch loop: runs until the stream reports cancellation.
pub async fn run_watcher(
    ctx: Arc<SchedulerContext>,
    mut stream: Box<dyn DirectoryEventStream>,
    root: PathBuf,
) {
    info!(root = %root.display(), "watching for new source files");

    loop {
        if ctx.is_shutting_down() {
            break;
        }

        match stream.next_batch(BATCH_TIMEOUT).await {
            WatchBatch::Events(paths) => {
                if paths.is_empty() {
                    continue;
                }
                let queued = enqueue_events(&ctx, paths);
                if queued > 0 {
                    debug!(queued, "queued files from change notifications");
                }
            }
            WatchBatch::Overflow => {
                warn!("change notifications overflowed, rescanning watch root");
                let queued = enqueue_full_scan(&ctx, &root);
                info!(queued, "rescan after overflow complete");
            }
            WatchBatch::Cancelled => break,
        }
    }

    info!("watcher stopped");
}

/// Open the notify stream for `root` and run the watch loop.
///
/// Setup failures are logged and end only this task.
pub async fn watch_directory(ctx: Arc<SchedulerContext>, root: PathBuf) {
    match NotifyEventStream::open(&root, ctx.shutdown_token().clone()) {
        Ok(stream) => run_watcher(ctx, Box::new(stream), root).await,
        Err(e) => error!(error = %e, root = %root.display(), "cannot watch directory"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scan::ExtensionRule;
    use notify::event::{CreateKind, DataChange, Flag};
    use std::collections::VecDeque;
    use std::fs::File;
    use tempfile::TempDir;

    /// Event stream replaying a fixed sequence, then reporting cancellation.
    pub(crate) struct ScriptedStream {
        batches: VecDeque<WatchBatch>,
    }

    impl ScriptedStream {
        pub(crate) fn new(batches: Vec<WatchBatch>) -> Self {
            Self {
                batches: batches.into(),
            }
        }
    }

    #[async_trait]
    impl DirectoryEventStream for ScriptedStream {
        async fn next_batch(&mut self, _timeout: Duration) -> WatchBatch {
            self.batches.pop_front().unwrap_or(WatchBatch::Cancelled)
        }
    }

    fn context() -> Arc<SchedulerContext> {
        Arc::new(SchedulerContext::new(ExtensionRule::new("jxr", "jpg")))
    }

    fn drain(ctx: &SchedulerContext) -> Vec<PathBuf> {
        let mut items = Vec::new();
        while let Some(item) = ctx.queue.try_pop() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_arrived_paths_creation_and_rename() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/c/a.jxr".into());
        assert_eq!(arrived_paths(&created), vec![PathBuf::from("/c/a.jxr")]);

        let renamed_to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path("/c/b.jxr".into());
        assert_eq!(arrived_paths(&renamed_to), vec![PathBuf::from("/c/b.jxr")]);

        let renamed_both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/c/old.tmp".into())
            .add_path("/c/new.jxr".into());
        assert_eq!(arrived_paths(&renamed_both), vec![PathBuf::from("/c/new.jxr")]);
    }

    #[test]
    fn test_arrived_paths_ignores_other_kinds() {
        let renamed_from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/c/a.jxr".into());
        assert!(arrived_paths(&renamed_from).is_empty());

        let written = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/c/a.jxr".into());
        assert!(arrived_paths(&written).is_empty());

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path("/c/a.jxr".into());
        assert!(arrived_paths(&removed).is_empty());
    }

    #[test]
    fn test_rescan_flag_is_detected() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert!(event.need_rescan());
    }

    #[tokio::test]
    async fn test_events_are_filtered_and_deduplicated() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let a = root.join("a.jxr");
        let b = root.join("b.jxr");
        let done = root.join("done.jxr");
        File::create(&a).unwrap();
        File::create(&b).unwrap();
        File::create(&done).unwrap();
        File::create(root.join("done.jpg")).unwrap();

        let ctx = context();
        let stream = ScriptedStream::new(vec![
            WatchBatch::Events(vec![
                a.clone(),
                root.join("a.jpg"),
                done.clone(),
                a.clone(),
                root.join("readme.txt"),
            ]),
            WatchBatch::Events(Vec::new()),
            WatchBatch::Events(vec![b.clone()]),
        ]);

        run_watcher(ctx.clone(), Box::new(stream), root).await;

        assert_eq!(drain(&ctx), vec![a, b]);
    }

    #[tokio::test]
    async fn test_overflow_triggers_single_full_scan() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        File::create(root.join("a.jxr")).unwrap();
        File::create(root.join("a.jpg")).unwrap();
        File::create(root.join("b.jxr")).unwrap();

        let ctx = context();
        let stream = ScriptedStream::new(vec![WatchBatch::Overflow]);
        run_watcher(ctx.clone(), Box::new(stream), root.clone()).await;

        assert_eq!(drain(&ctx), vec![root.join("b.jxr")]);
    }

    #[tokio::test]
    async fn test_watcher_exits_on_shutdown() {
        let ctx = context();
        ctx.shutdown();
        let stream = ScriptedStream::new(vec![WatchBatch::Overflow]);

        tokio::time::timeout(
            Duration::from_secs(1),
            run_watcher(ctx.clone(), Box::new(stream), PathBuf::from("/nonexistent")),
        )
        .await
        .expect("watcher should return promptly after shutdown");
    }

    fn created(path: &str) -> Result<Event, notify::Error> {
        Ok(Event::new(EventKind::Create(CreateKind::File)).add_path(path.into()))
    }

    #[tokio::test]
    async fn test_stream_batches_queued_events() {
        let (mut stream, forwarder) = NotifyEventStream::unwatched(8, CancellationToken::new());
        forwarder.forward(created("/c/a.jxr"));
        forwarder.forward(created("/c/b.jxr"));

        let batch = stream.next_batch(Duration::from_secs(1)).await;
        assert_eq!(
            batch,
            WatchBatch::Events(vec![PathBuf::from("/c/a.jxr"), PathBuf::from("/c/b.jxr")])
        );
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_batch() {
        let cancel = CancellationToken::new();
        let (mut stream, _forwarder) = NotifyEventStream::unwatched(8, cancel.clone());

        let pending = tokio::spawn(async move { stream.next_batch(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        cancel.cancel();
        let batch = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("cancel should end the wait")
            .unwrap();
        assert_eq!(batch, WatchBatch::Cancelled);
    }

    #[tokio::test]
    async fn test_full_channel_reports_overflow() {
        let (mut stream, forwarder) = NotifyEventStream::unwatched(2, CancellationToken::new());
        for path in ["/c/a.jxr", "/c/b.jxr", "/c/c.jxr"] {
            forwarder.forward(created(path));
        }

        assert_eq!(stream.next_batch(Duration::from_secs(1)).await, WatchBatch::Overflow);
        // The flag is consumed; what fit in the channel follows.
        assert_eq!(
            stream.next_batch(Duration::from_secs(1)).await,
            WatchBatch::Events(vec![PathBuf::from("/c/a.jxr"), PathBuf::from("/c/b.jxr")])
        );
    }

    #[tokio::test]
    async fn test_rescan_event_reports_overflow() {
        let (mut stream, forwarder) = NotifyEventStream::unwatched(8, CancellationToken::new());
        forwarder.forward(created("/c/a.jxr"));
        forwarder.forward(Ok(Event::new(EventKind::Other).set_flag(Flag::Rescan)));

        assert_eq!(stream.next_batch(Duration::from_secs(1)).await, WatchBatch::Overflow);
    }

    #[tokio::test]
    async fn test_backend_error_is_skipped() {
        let (mut stream, forwarder) = NotifyEventStream::unwatched(8, CancellationToken::new());
        forwarder.forward(Err(notify::Error::generic("backend hiccup")));

        let batch = stream.next_batch(Duration::from_millis(20)).await;
        assert_eq!(batch, WatchBatch::Events(Vec::new()));
    }

    #[tokio::test]
    async fn test_closed_channel_is_cancelled() {
        let (mut stream, forwarder) = NotifyEventStream::unwatched(8, CancellationToken::new());
        drop(forwarder);

        let batch = stream.next_batch(Duration::from_secs(1)).await;
        assert_eq!(batch, WatchBatch::Cancelled);
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let result = NotifyEventStream::open(&missing, CancellationToken::new());
        assert!(matches!(result, Err(WatchError::RootMissing(_))));
    }
}
