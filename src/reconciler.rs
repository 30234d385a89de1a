//! Session reconciler: applies parsed events to the usage store.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::events::{LogEvent, PromptEvent};
use crate::store::{Session, StoreError, UsageApplied, UsageStore};

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new session row was created.
    Created,
    /// An existing session absorbed the event.
    Updated,
    /// The event carried nothing to apply.
    Ignored,
}

/// Counters reported when the reconciler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Events that changed or created a session.
    pub applied: u64,
    /// Sessions created, counted within `applied`.
    pub created: u64,
    /// Events that needed no write.
    pub ignored: u64,
    /// Events whose write failed and was dropped.
    pub failed: u64,
}

impl ReconcilerStats {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created => {
                self.applied += 1;
                self.created += 1;
            }
            ReconcileOutcome::Updated => self.applied += 1,
            ReconcileOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Consumes events from one bus subscription and folds them into sessions.
///
/// Accumulation is purely additive: replaying an event counts it again.
/// Exactly-once delivery is the tail readers' job.
pub struct SessionReconciler {
    store: UsageStore,
    rx: mpsc::Receiver<LogEvent>,
}

impl SessionReconciler {
    #[must_use]
    pub fn new(store: UsageStore, rx: mpsc::Receiver<LogEvent>) -> Self {
        Self { store, rx }
    }

    /// Apply a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn apply(store: &UsageStore, event: &LogEvent) -> Result<ReconcileOutcome, StoreError> {
        match event {
            LogEvent::Prompt(prompt) => apply_prompt(store, prompt).await,
            LogEvent::TokenUsage(usage) => Ok(match store.apply_usage(usage).await? {
                UsageApplied::Created => ReconcileOutcome::Created,
                UsageApplied::Accumulated => ReconcileOutcome::Updated,
            }),
        }
    }

    /// Apply events until every sender is gone, then report counters.
    ///
    /// Store failures are logged and the event is dropped.
    pub async fn run(mut self) -> ReconcilerStats {
        let mut stats = ReconcilerStats::default();
        tracing::debug!("Session reconciler started");

        while let Some(event) = self.rx.recv().await {
            match Self::apply(&self.store, &event).await {
                Ok(outcome) => {
                    tracing::trace!(session_id = ?event.session_id(), outcome = ?outcome, "Applied event");
                    stats.record(outcome);
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        session_id = ?event.session_id(),
                        error = %e,
                        "Failed to persist event, dropping it"
                    );
                }
            }
        }

        tracing::info!(
            applied = stats.applied,
            created = stats.created,
            ignored = stats.ignored,
            failed = stats.failed,
            "Session reconciler stopped"
        );
        stats
    }
}

async fn apply_prompt(store: &UsageStore, prompt: &PromptEvent) -> Result<ReconcileOutcome, StoreError> {
    let Some(session_id) = prompt.session_id.as_deref() else {
        return Ok(ReconcileOutcome::Ignored);
    };
    let session = Session::new(session_id, prompt.timestamp.unwrap_or_else(Utc::now))
        .with_project(prompt.project.clone());

    if store.create_session_if_absent(&session).await? {
        tracing::info!(session_id, project = ?prompt.project, "New session from prompt");
        Ok(ReconcileOutcome::Created)
    } else {
        Ok(ReconcileOutcome::Ignored)
    }
}
