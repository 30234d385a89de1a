//! Database schema and additive migrations for the usage store.

use rusqlite::Connection;

use super::error::StoreError;

/// Current schema version.
///
/// Version 1 stored `estimated_output_tokens` and had no `actual_model`
/// column; version 2 renames the former and adds the latter.
pub const SCHEMA_VERSION: u32 = 2;

/// SQL schema for the usage database.
///
/// Timestamps are stored as `REAL` seconds since the Unix epoch so that
/// databases written by earlier releases stay readable.
pub const SCHEMA: &str = r"
PRAGMA journal_mode = WAL;

-- One row per Claude Code session id
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL UNIQUE,
    project_path TEXT,
    start_time REAL NOT NULL,
    last_activity_time REAL NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    model_name TEXT NOT NULL DEFAULT 'sonnet',
    actual_model TEXT
);

-- Byte offset of the last successful read, per tailed file
CREATE TABLE IF NOT EXISTS jsonl_offsets (
    file_path TEXT PRIMARY KEY NOT NULL,
    last_offset INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity_time);
";

/// Create missing tables and bring older layouts up to date.
///
/// Safe to run on every open: each step checks the live column set first
/// and only ever renames or adds columns.
///
/// # Errors
///
/// Returns an error if the base schema cannot be applied or a migration
/// step fails.
pub fn initialize(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    migrate(conn)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let columns = column_names(conn, "sessions")?;
    let has = |name: &str| columns.iter().any(|c| c == name);

    if has("estimated_output_tokens") && !has("output_tokens") {
        tracing::info!("Migrating sessions.estimated_output_tokens to output_tokens");
        run_step(
            conn,
            "rename_estimated_output_tokens",
            "ALTER TABLE sessions RENAME COLUMN estimated_output_tokens TO output_tokens",
        )?;
    }

    if !has("actual_model") {
        tracing::info!("Adding sessions.actual_model column");
        run_step(
            conn,
            "add_actual_model",
            "ALTER TABLE sessions ADD COLUMN actual_model TEXT",
        )?;
    }

    if !has("project_path") {
        tracing::info!("Adding sessions.project_path column");
        run_step(
            conn,
            "add_project_path",
            "ALTER TABLE sessions ADD COLUMN project_path TEXT",
        )?;
    }

    if !has("model_name") {
        tracing::info!("Adding sessions.model_name column");
        run_step(
            conn,
            "add_model_name",
            "ALTER TABLE sessions ADD COLUMN model_name TEXT NOT NULL DEFAULT 'sonnet'",
        )?;
    }

    Ok(())
}

fn run_step(conn: &Connection, step: &'static str, sql: &str) -> Result<(), StoreError> {
    conn.execute_batch(sql)
        .map_err(|source| StoreError::Migration { step, source })
}

/// Column names of `table`, in declaration order.
pub(crate) fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
