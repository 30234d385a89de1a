//! Store error types.

use std::path::PathBuf;

/// Errors that can occur while reading or writing the usage database.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Failed to open or create database.
    #[error("Failed to open database at {path}: {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Failed to execute SQL.
    #[error("Database query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// A schema migration step failed.
    #[error("Schema migration '{step}' failed: {source}")]
    Migration {
        step: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Blocking task was cancelled.
    #[error("Blocking task cancelled")]
    TaskCancelled,

    /// Failed to create parent directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_open_display() {
        let err = StoreError::DatabaseOpen {
            path: PathBuf::from("/tmp/usage.db"),
            source: rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some("test".to_string()),
            ),
        };
        assert!(err.to_string().contains("Failed to open database"));
        assert!(err.to_string().contains("/tmp/usage.db"));
    }

    #[test]
    fn test_migration_display_names_step() {
        let err = StoreError::Migration {
            step: "add_actual_model",
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(err.to_string().contains("add_actual_model"));
    }

    #[test]
    fn test_task_cancelled_display() {
        assert_eq!(StoreError::TaskCancelled.to_string(), "Blocking task cancelled");
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Query(_)));
    }
}
