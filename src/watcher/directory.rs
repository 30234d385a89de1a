//! Directory watcher that discovers session logs and owns their tail workers.
//!
//! Watches the projects root and each project subdirectory non-recursively.
//! Any structural change (or a safety-net tick) triggers a rescan, and content
//! changes on known files wake the matching worker. Extra files outside the
//! projects root, such as the prompt history, are tracked the same way.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{
    new_debouncer,
    notify::{event::ModifyKind, EventKind, RecommendedWatcher, RecursiveMode},
    DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache,
};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::bus::EventBus;
use super::discovery::{is_session_log, list_project_dirs, list_session_logs};
use super::error::WatcherError;
use super::jsonl::StreamKind;
use super::tailer::{next_tick, run_tail_worker, TailReader};
use crate::store::{StoreError, UsageStore};

/// Default debounce window for filesystem notifications.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

type FsDebouncer = Debouncer<RecommendedWatcher, RecommendedCache>;

/// A single file tailed alongside the projects tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub kind: StreamKind,
    /// Skip content that predates the first time this file is seen.
    pub start_at_end: bool,
}

struct FileWorker {
    trigger: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// What one pass over the disk found.
#[derive(Debug, Default)]
struct Scan {
    dirs: HashSet<PathBuf>,
    logs: Vec<PathBuf>,
    extra: Vec<TrackedFile>,
}

/// Discovers session logs under a projects root and runs one tail worker
/// per file.
pub struct DirectoryWatcher {
    root: PathBuf,
    extra: Vec<TrackedFile>,
    store: UsageStore,
    bus: EventBus,
    debounce: Duration,
    safety_tick: Option<Duration>,
    cancel: CancellationToken,
    debouncer: Option<FsDebouncer>,
    workers: HashMap<PathBuf, FileWorker>,
    watched_dirs: HashSet<PathBuf>,
    /// Files that have had a worker during this run.
    seen: HashSet<PathBuf>,
}

impl DirectoryWatcher {
    /// Create a watcher for `root`. Nothing happens until [`run`](Self::run).
    #[must_use]
    pub fn new(root: PathBuf, store: UsageStore, bus: EventBus, cancel: CancellationToken) -> Self {
        Self {
            root,
            extra: Vec::new(),
            store,
            bus,
            debounce: DEFAULT_DEBOUNCE,
            safety_tick: None,
            cancel,
            debouncer: None,
            workers: HashMap::new(),
            watched_dirs: HashSet::new(),
            seen: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Rescan and re-poll every file on this period, masking missed
    /// notifications. `None` disables the tick.
    #[must_use]
    pub fn with_safety_tick(mut self, period: Option<Duration>) -> Self {
        self.safety_tick = period.filter(|p| !p.is_zero());
        self
    }

    /// Also tail `file`, which may live outside the projects root.
    #[must_use]
    pub fn track_file(mut self, file: TrackedFile) -> Self {
        self.extra.push(file);
        self
    }

    /// Number of files with a live tail worker.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers.values().filter(|w| !w.handle.is_finished()).count()
    }

    /// Watch until cancelled, then stop every worker and wait for them.
    pub async fn run(mut self) {
        match cleanup_orphaned_offsets(&self.store).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed offsets of vanished files"),
            Err(e) => tracing::warn!(error = %e, "Failed to clean up orphaned offsets"),
        }

        let mut fs_rx = self.start_debouncer();

        let mut ticker = self.safety_tick.map(|period| {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        tracing::info!(root = %self.root.display(), "Directory watcher started");
        self.rescan().await;

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = next_fs_event(&mut fs_rx) => {
                    if self.dispatch(result) {
                        self.rescan().await;
                    }
                }
                () = next_tick(&mut ticker) => self.rescan().await,
            }
        }

        self.shutdown().await;
    }

    fn start_debouncer(&mut self) -> Option<mpsc::UnboundedReceiver<DebounceEventResult>> {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        match new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            let _ = fs_tx.send(result);
        }) {
            Ok(debouncer) => {
                self.debouncer = Some(debouncer);
                Some(fs_rx)
            }
            Err(e) => {
                let e = WatcherError::from(e);
                tracing::warn!(error = %e, "File watcher unavailable, relying on periodic rescans");
                None
            }
        }
    }

    async fn shutdown(&mut self) {
        // Stops the notify thread before the workers are awaited.
        self.debouncer = None;
        self.watched_dirs.clear();
        for (path, worker) in self.workers.drain() {
            if let Err(e) = worker.handle.await {
                tracing::warn!(path = %path.display(), error = %e, "Tail worker panicked");
            }
        }
        tracing::info!(root = %self.root.display(), "Directory watcher stopped");
    }

    /// Bring watches and workers in line with what is on disk.
    async fn rescan(&mut self) {
        self.workers.retain(|_, worker| !worker.handle.is_finished());

        let root = self.root.clone();
        let extra = self.extra.clone();
        let scan = match tokio::task::spawn_blocking(move || scan_disk(&root, &extra)).await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "Directory scan failed");
                return;
            }
        };

        self.sync_watches(&scan.dirs);

        for log in scan.logs {
            self.ensure_worker(log, StreamKind::Session, false);
        }
        for tracked in scan.extra {
            self.ensure_worker(tracked.path, tracked.kind, tracked.start_at_end);
        }
    }

    fn sync_watches(&mut self, desired: &HashSet<PathBuf>) {
        let Some(debouncer) = self.debouncer.as_mut() else {
            return;
        };

        let vanished: Vec<PathBuf> = self.watched_dirs.difference(desired).cloned().collect();
        for dir in vanished {
            // The OS drops watches on deleted directories on its own.
            let _ = debouncer.unwatch(&dir);
            self.watched_dirs.remove(&dir);
            tracing::debug!(dir = %dir.display(), "Stopped watching directory");
        }

        for dir in desired {
            if self.watched_dirs.contains(dir) {
                continue;
            }
            match debouncer.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(dir = %dir.display(), "Watching directory");
                    self.watched_dirs.insert(dir.clone());
                }
                Err(e) => {
                    let e = WatcherError::from(e);
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to watch directory");
                }
            }
        }
    }

    fn ensure_worker(&mut self, path: PathBuf, kind: StreamKind, start_at_end: bool) {
        if self.workers.contains_key(&path) {
            return;
        }
        // A file recreated after its first worker stopped is read from the start.
        let start_at_end = self.seen.insert(path.clone()) && start_at_end;
        tracing::info!(path = %path.display(), kind = ?kind, start_at_end, "Tailing file");

        let trigger = Arc::new(Notify::new());
        let reader =
            TailReader::new(path.clone(), kind, self.store.clone()).with_start_at_end(start_at_end);
        let handle = tokio::spawn(run_tail_worker(
            reader,
            self.bus.clone(),
            Arc::clone(&trigger),
            self.cancel.child_token(),
            self.safety_tick,
        ));
        self.workers.insert(path, FileWorker { trigger, handle });
    }

    /// Wake workers for the changed files. Returns `true` if a rescan is due.
    fn dispatch(&self, result: DebounceEventResult) -> bool {
        match result {
            Ok(events) => events
                .iter()
                .fold(false, |rescan, event| self.route(event) || rescan),
            Err(errors) => {
                for error in errors {
                    tracing::warn!(error = %error, "File watcher error");
                }
                true
            }
        }
    }

    fn route(&self, event: &DebouncedEvent) -> bool {
        let structural = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        let mut rescan = event.need_rescan();

        for path in &event.paths {
            if let Some(worker) = self.workers.get(path) {
                worker.trigger.notify_one();
                rescan |= structural;
            } else if self.is_relevant(path) {
                rescan = true;
            }
        }
        rescan
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if path == self.root || self.watched_dirs.contains(path) {
            return true;
        }
        if self.extra.iter().any(|tracked| tracked.path == path) {
            return true;
        }
        match path.parent() {
            Some(parent) if parent == self.root => true,
            Some(parent) if parent.parent() == Some(self.root.as_path()) => is_session_log(path),
            _ => false,
        }
    }
}

fn scan_disk(root: &Path, extra: &[TrackedFile]) -> Scan {
    let mut scan = Scan::default();
    if root.is_dir() {
        scan.dirs.insert(root.to_path_buf());
        for dir in list_project_dirs(root) {
            scan.logs.extend(list_session_logs(&dir));
            scan.dirs.insert(dir);
        }
    } else {
        tracing::debug!(root = %root.display(), "Projects root missing, will retry");
    }

    for tracked in extra {
        if let Some(parent) = tracked.path.parent().filter(|p| p.is_dir()) {
            scan.dirs.insert(parent.to_path_buf());
        }
        if tracked.path.is_file() {
            scan.extra.push(tracked.clone());
        }
    }
    scan
}

async fn next_fs_event(
    rx: &mut Option<mpsc::UnboundedReceiver<DebounceEventResult>>,
) -> DebounceEventResult {
    let received = match rx.as_mut() {
        Some(inner) => inner.recv().await,
        None => None,
    };
    match received {
        Some(result) => result,
        None => {
            *rx = None;
            std::future::pending().await
        }
    }
}

/// Drop persisted offsets whose files no longer exist.
///
/// Returns how many entries were removed.
///
/// # Errors
///
/// Returns an error if the offsets cannot be listed or deleted.
pub async fn cleanup_orphaned_offsets(store: &UsageStore) -> Result<usize, StoreError> {
    let mut removed = 0;
    for path in store.offset_paths().await? {
        // Unknown existence (e.g. permissions) keeps the entry.
        if !tokio::fs::try_exists(&path).await.unwrap_or(true) && store.delete_offset(&path).await? {
            tracing::debug!(path = %path.display(), "Removed orphaned offset");
            removed += 1;
        }
    }
    Ok(removed)
}
