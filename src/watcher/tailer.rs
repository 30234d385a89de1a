//! Incremental JSONL file reader with persisted offsets.
//!
//! A [`TailReader`] reads only the bytes appended to its file since the
//! last successful read. The offset lives in the [`UsageStore`], so a
//! restart resumes exactly where the previous run stopped.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Notify;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bus::EventSink;
use super::error::WatcherError;
use super::jsonl::{parse_line, StreamKind};
use crate::store::UsageStore;

/// What a single [`TailReader::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// File size matches the stored offset.
    Unchanged,
    /// File shrank below the stored offset; offset reset to zero.
    Truncated { previous_offset: u64, size: u64 },
    /// New bytes were consumed.
    Read {
        bytes: u64,
        lines: usize,
        events: usize,
        offset: u64,
    },
    /// File is gone; its offset entry was removed.
    Deleted,
}

/// Reader for one tailed file.
#[derive(Debug, Clone)]
pub struct TailReader {
    path: PathBuf,
    kind: StreamKind,
    store: UsageStore,
    start_at_end: bool,
}

impl TailReader {
    /// Create a reader that processes `path` from its persisted offset, or
    /// from the beginning when no offset exists.
    #[must_use]
    pub fn new(path: PathBuf, kind: StreamKind, store: UsageStore) -> Self {
        Self {
            path,
            kind,
            store,
            start_at_end: false,
        }
    }

    /// When no offset is persisted yet, skip the existing content and only
    /// read what is appended from now on.
    #[must_use]
    pub fn with_start_at_end(mut self, start_at_end: bool) -> Self {
        self.start_at_end = start_at_end;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Consume whatever was appended since the last poll and publish the
    /// parsed events to `sink`, in file order.
    ///
    /// Reads stop at the file size observed when the poll starts, and the
    /// offset moves to exactly that size. A line that is still being written
    /// at that moment is split: neither half parses, so the record is lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read for a reason other than
    /// being missing, or if the offset cannot be persisted. Nothing is
    /// published in either case, so the next poll retries the same bytes.
    pub async fn poll(&self, sink: &dyn EventSink) -> Result<ReadOutcome, WatcherError> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.store.delete_offset(&self.path).await?;
                return Ok(ReadOutcome::Deleted);
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(WatcherError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(WatcherError::Io(e)),
        };

        let size = file.metadata().await?.len();
        let offset = match self.store.get_offset(&self.path).await? {
            Some(offset) => offset,
            None if self.start_at_end => {
                self.store.set_offset(&self.path, size).await?;
                tracing::debug!(path = %self.path.display(), size, "Skipping existing content");
                return Ok(ReadOutcome::Unchanged);
            }
            None => 0,
        };

        if size < offset {
            tracing::warn!(
                path = %self.path.display(),
                old_offset = offset,
                new_len = size,
                "File truncated, resetting offset to 0"
            );
            self.store.set_offset(&self.path, 0).await?;
            return Ok(ReadOutcome::Truncated {
                previous_offset: offset,
                size,
            });
        }
        if size == offset {
            return Ok(ReadOutcome::Unchanged);
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(size - offset).read_to_end(&mut buf).await?;
        let bytes = buf.len() as u64;
        let new_offset = offset + bytes;

        self.store.set_offset(&self.path, new_offset).await?;

        let text = match String::from_utf8(buf) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    bytes,
                    error = %e,
                    "Appended bytes are not valid UTF-8, skipping slice"
                );
                String::new()
            }
        };

        let mut lines = 0;
        let mut events = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            lines += 1;
            if let Some(event) = parse_line(self.kind, line) {
                sink.publish(event).await;
                events += 1;
            }
        }

        tracing::trace!(
            path = %self.path.display(),
            bytes,
            lines,
            events,
            offset = new_offset,
            "Read appended content"
        );
        Ok(ReadOutcome::Read {
            bytes,
            lines,
            events,
            offset: new_offset,
        })
    }
}

/// Drive `reader` until its file disappears or `cancel` fires.
///
/// The reader polls once on start, then on every `trigger` notification and
/// on each `safety_tick` if one is configured.
pub(crate) async fn run_tail_worker<S>(
    reader: TailReader,
    sink: S,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    safety_tick: Option<Duration>,
) where
    S: EventSink,
{
    let path = reader.path().display().to_string();
    tracing::debug!(path = %path, kind = ?reader.kind(), "Tail worker started");

    let mut ticker = safety_tick.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        match reader.poll(&sink).await {
            Ok(ReadOutcome::Deleted) => {
                tracing::info!(path = %path, "Tailed file removed, stopping reader");
                break;
            }
            // The rewritten content is read on the immediately following poll.
            Ok(ReadOutcome::Truncated { .. }) => trigger.notify_one(),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Tail read failed, will retry");
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = trigger.notified() => {}
            () = next_tick(&mut ticker) => {}
        }
    }

    tracing::debug!(path = %path, "Tail worker stopped");
}

pub(super) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
