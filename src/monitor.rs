//! Monitor: wires the ingestion pipeline and owns its lifecycle.
//!
//! Startup is split in two so that every subscriber is attached before any
//! tail reader can replay backlog. [`Monitor::new`] only wires the bus and
//! the reconciler's subscription; [`Monitor::start`] consumes the wired
//! monitor and begins I/O.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CarbonConfig;
use crate::events::LogEvent;
use crate::reconciler::{ReconcilerStats, SessionReconciler};
use crate::store::UsageStore;
use crate::watcher::{DirectoryWatcher, EventBus, StreamKind, TrackedFile};

/// A wired but not yet running pipeline.
pub struct Monitor {
    config: CarbonConfig,
    store: UsageStore,
    bus: EventBus,
    reconciler: SessionReconciler,
}

impl Monitor {
    /// Wire the bus and the reconciler subscription. No files are touched.
    #[must_use]
    pub fn new(config: CarbonConfig, store: UsageStore) -> Self {
        let bus = EventBus::new(config.watch.channel_capacity);
        let reconciler = SessionReconciler::new(store.clone(), bus.subscribe());
        Self {
            config,
            store,
            bus,
            reconciler,
        }
    }

    /// Attach an extra subscriber that sees every event from the start.
    ///
    /// The receiver must be drained: a full queue holds up every reader.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<LogEvent> {
        self.bus.subscribe()
    }

    /// Start the reconciler and the directory watcher.
    #[must_use]
    pub fn start(self) -> MonitorHandle {
        let Self {
            config,
            store,
            bus,
            reconciler,
        } = self;

        let reconciler = tokio::spawn(reconciler.run());

        let cancel = CancellationToken::new();
        let projects_dir = config.projects_dir();
        let mut watcher = DirectoryWatcher::new(projects_dir.clone(), store, bus, cancel.clone())
            .with_debounce(config.watch.debounce())
            .with_safety_tick(config.watch.safety_tick());
        if config.watch.history {
            watcher = watcher.track_file(TrackedFile {
                path: config.history_file(),
                kind: StreamKind::History,
                start_at_end: !config.watch.replay_history_backlog,
            });
        }

        tracing::info!(
            projects_dir = %projects_dir.display(),
            history = config.watch.history,
            "Monitoring started"
        );
        let watcher = tokio::spawn(watcher.run());

        MonitorHandle {
            cancel,
            watcher,
            reconciler,
        }
    }
}

/// Handle to a running pipeline.
pub struct MonitorHandle {
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
    reconciler: JoinHandle<ReconcilerStats>,
}

impl MonitorHandle {
    /// Token that stops the pipeline when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every watcher and reader, let the reconciler drain what was
    /// already published, and return its counters.
    pub async fn stop(self) -> ReconcilerStats {
        self.cancel.cancel();
        if let Err(e) = self.watcher.await {
            tracing::warn!(error = %e, "Directory watcher task failed");
        }
        // The watcher owned the last bus clone, so the reconciler's channel
        // is closed once it and its workers are gone.
        let stats = match self.reconciler.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Reconciler task failed");
                ReconcilerStats::default()
            }
        };
        tracing::info!("Monitoring stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_and_stop_with_missing_dirs() {
        let dir = TempDir::new().unwrap();
        let config = CarbonConfig {
            projects_dir: Some(dir.path().join("projects")),
            history_file: Some(dir.path().join("history.jsonl")),
            database: None,
            watch: WatchConfig {
                debounce_ms: 20,
                safety_tick_secs: 1,
                ..WatchConfig::default()
            },
        };
        let store = UsageStore::open_in_memory().await.unwrap();

        let handle = Monitor::new(config, store).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
        assert_eq!(stats, ReconcilerStats::default());
    }
}
