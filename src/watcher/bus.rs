//! Fan-out of parsed events to subscribers.
//!
//! Every subscriber gets its own bounded queue and sees every event.
//! Publishing waits for queue capacity instead of dropping: offsets are
//! already advanced by the time an event is published, so a dropped event
//! could never be recovered.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::LogEvent;

/// Default per-subscriber queue depth.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Destination for events produced by tail readers.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver `event`, returning the number of subscribers that received it.
    async fn publish(&self, event: LogEvent) -> usize;
}

/// Multi-subscriber event queue.
#[derive(Debug, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<LogEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose subscriber queues hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber.
    ///
    /// Only events published after this call are delivered to it.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<LogEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().push(tx);
        rx
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<LogEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event: LogEvent) -> usize {
        // Clone the senders so the lock is not held across an await.
        let senders: Vec<_> = self.lock().clone();
        let mut delivered = 0;
        let mut closed = false;

        for tx in &senders {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }

        if closed {
            self.lock().retain(|tx| !tx.is_closed());
        }
        if delivered == 0 {
            tracing::debug!(session_id = ?event.session_id(), "Event published with no subscribers");
        }
        delivered
    }
}
