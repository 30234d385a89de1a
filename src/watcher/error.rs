//! Watcher error types.

use std::path::PathBuf;

use crate::store::StoreError;

/// Errors that can occur while watching or tailing log files.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Permission denied accessing file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Offset bookkeeping failed.
    #[error("Offset store error: {0}")]
    Store(#[from] StoreError),
}
