//! Usage store implementation with async `SQLite` operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::StoreError;
use super::schema;
use super::types::{
    burn_rate_by_day, daily_usage, hourly_usage, BurnRatePoint, DailyUsage, HourlyUsage,
    ModelUsage, Period, Session,
};
use crate::events::TokenUsageEvent;

const SESSION_COLUMNS: &str = "id, session_id, project_path, start_time, last_activity_time, \
     input_tokens, output_tokens, model_name, actual_model";

/// Returns the default path for the usage database.
///
/// This is `~/.local/share/claude-carbon/usage.db` on Linux.
#[must_use]
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("claude-carbon")
        .join("usage.db")
}

/// What [`UsageStore::apply_usage`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageApplied {
    /// No session existed; one was created from the event.
    Created,
    /// Tokens were added to an existing session.
    Accumulated,
}

/// Durable store for session aggregates and per-file read offsets.
///
/// All access goes through one connection guarded by a mutex, and every
/// read-modify-write runs inside an immediate transaction, so concurrent
/// callers are serialized per row without any locking of their own.
#[derive(Debug, Clone)]
pub struct UsageStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl UsageStore {
    /// Open a store at the specified path.
    ///
    /// Creates parent directories if they don't exist, applies the schema
    /// and runs any pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let path_clone = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path_clone).map_err(|source| StoreError::DatabaseOpen {
                path: path_clone,
                source,
            })?;
            schema::initialize(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        tracing::debug!(path = %path.display(), "Opened usage store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, StoreError> {
            let conn = Connection::open_in_memory()?;
            schema::initialize(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Returns the path to the database, if opened from a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|_| StoreError::TaskCancelled)?
    }

    // Sessions

    /// Look up a session by its Claude Code session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| select_session(conn, &session_id))
            .await
    }

    /// Insert a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, including when a session with
    /// the same session id already exists.
    pub async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            insert_session_row(conn, &session)?;
            Ok(())
        })
        .await
    }

    /// Insert `session` unless a row with its session id already exists.
    ///
    /// Existing rows are never modified. Returns `true` if a row was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_session_if_absent(&self, session: &Session) -> Result<bool, StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO sessions (id, session_id, project_path, start_time, last_activity_time,
                                       input_tokens, output_tokens, model_name, actual_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(session_id) DO NOTHING",
                params![
                    session.id.to_string(),
                    session.session_id,
                    session.project_path,
                    to_epoch_seconds(session.start_time),
                    to_epoch_seconds(session.last_activity_time),
                    session.input_tokens,
                    session.output_tokens,
                    session.model_name,
                    session.actual_model,
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    /// Overwrite the mutable fields of an existing session.
    ///
    /// Returns `false` if no session with that id exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update_session(&self, session: &Session) -> Result<bool, StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| Ok(update_session_row(conn, &session)? > 0))
            .await
    }

    /// Merge one usage delta into its session, creating the session if needed.
    ///
    /// The read and the write happen in one immediate transaction, so two
    /// writers touching the same session id never interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written in
    /// that case.
    pub async fn apply_usage(&self, event: &TokenUsageEvent) -> Result<UsageApplied, StoreError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let applied = match select_session(&tx, &event.session_id)? {
                Some(mut session) => {
                    session.input_tokens = session.input_tokens.saturating_add(event.input_tokens);
                    session.output_tokens =
                        session.output_tokens.saturating_add(event.output_tokens);
                    session.actual_model = Some(event.model.clone());
                    if event.timestamp > session.last_activity_time {
                        session.last_activity_time = event.timestamp;
                    }
                    if event.timestamp < session.start_time {
                        session.start_time = event.timestamp;
                    }
                    update_session_row(&tx, &session)?;
                    UsageApplied::Accumulated
                }
                None => {
                    let mut session = Session::new(event.session_id.clone(), event.timestamp);
                    session.input_tokens = event.input_tokens;
                    session.output_tokens = event.output_tokens;
                    session.actual_model = Some(event.model.clone());
                    insert_session_row(&tx, &session)?;
                    UsageApplied::Created
                }
            };
            tx.commit()?;
            Ok(applied)
        })
        .await
    }

    /// Most recently active sessions first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY last_activity_time DESC LIMIT ?1"
            ))?;
            let sessions = stmt
                .query_map(params![limit], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
        .await
    }

    /// Sessions whose last activity is at or after `since` (all if `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn sessions_active_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Session>, StoreError> {
        let since = since.map_or(f64::MIN, to_epoch_seconds);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE last_activity_time >= ?1 ORDER BY last_activity_time ASC"
            ))?;
            let sessions = stmt
                .query_map(params![since], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
        .await
    }

    /// Count all sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_sessions(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count =
                conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| column_u64(row, 0))?;
            Ok(count)
        })
        .await
    }

    // Aggregates

    /// Token totals grouped by model, for sessions active since `since`.
    ///
    /// Sessions are attributed to their observed model when known, and to
    /// the declared model otherwise. Largest total first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn usage_by_model(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ModelUsage>, StoreError> {
        let since = since.map_or(f64::MIN, to_epoch_seconds);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(actual_model, model_name) AS model,
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0),
                        COUNT(*)
                 FROM sessions
                 WHERE last_activity_time >= ?1
                 GROUP BY model
                 ORDER BY SUM(input_tokens + output_tokens) DESC, model ASC",
            )?;
            let rows = stmt
                .query_map(params![since], |row| {
                    Ok(ModelUsage {
                        model: row.get(0)?,
                        input_tokens: row.get(1)?,
                        output_tokens: row.get(2)?,
                        sessions: column_u64(row, 3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Token totals grouped by model for a reporting period.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn usage_for_period(&self, period: Period) -> Result<Vec<ModelUsage>, StoreError> {
        self.usage_by_model(period.lower_bound_now()).await
    }

    /// Per-day totals for a period, in local time, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn daily_usage(&self, period: Period) -> Result<Vec<DailyUsage>, StoreError> {
        let sessions = self.sessions_active_since(period.lower_bound_now()).await?;
        Ok(daily_usage(&sessions, &Local))
    }

    /// Per-hour totals for today, in local time.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn hourly_usage_today(&self) -> Result<Vec<HourlyUsage>, StoreError> {
        let now = Local::now();
        let sessions = self
            .sessions_active_since(Period::Today.lower_bound(&now))
            .await?;
        Ok(hourly_usage(&sessions, now.date_naive(), &Local))
    }

    /// Burn rate per day for a period, in local time, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn burn_rate_by_day(&self, period: Period) -> Result<Vec<BurnRatePoint>, StoreError> {
        let sessions = self.sessions_active_since(period.lower_bound_now()).await?;
        Ok(burn_rate_by_day(&sessions, &Local))
    }

    // File offsets

    /// Persisted read offset for `path`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_offset(&self, path: &Path) -> Result<Option<u64>, StoreError> {
        let key = offset_key(path);
        self.with_conn(move |conn| {
            let offset = conn
                .query_row(
                    "SELECT last_offset FROM jsonl_offsets WHERE file_path = ?1",
                    params![key],
                    |row| column_u64(row, 0),
                )
                .optional()?;
            Ok(offset)
        })
        .await
    }

    /// Upsert the read offset for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_offset(&self, path: &Path, offset: u64) -> Result<(), StoreError> {
        let key = offset_key(path);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jsonl_offsets (file_path, last_offset) VALUES (?1, ?2)
                 ON CONFLICT(file_path) DO UPDATE SET last_offset = excluded.last_offset",
                params![key, offset],
            )?;
            Ok(())
        })
        .await
    }

    /// Remove the offset entry for `path`. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_offset(&self, path: &Path) -> Result<bool, StoreError> {
        let key = offset_key(path);
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM jsonl_offsets WHERE file_path = ?1",
                params![key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Every path that has a persisted offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn offset_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT file_path FROM jsonl_offsets ORDER BY file_path")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|r| r.map(PathBuf::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(paths)
        })
        .await
    }
}

fn offset_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[allow(clippy::cast_precision_loss)]
fn to_epoch_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch_seconds(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64).unwrap_or_default()
}

/// Read a non-negative integer column. A negative value is reported as
/// out of range instead of being reinterpreted.
fn column_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    Ok(Session {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        session_id: row.get(1)?,
        project_path: row.get(2)?,
        start_time: from_epoch_seconds(row.get(3)?),
        last_activity_time: from_epoch_seconds(row.get(4)?),
        input_tokens: column_u64(row, 5)?,
        output_tokens: column_u64(row, 6)?,
        model_name: row.get(7)?,
        actual_model: row.get(8)?,
    })
}

fn select_session(conn: &Connection, session_id: &str) -> Result<Option<Session>, StoreError> {
    let session = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
            params![session_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

fn insert_session_row(conn: &Connection, session: &Session) -> Result<usize, StoreError> {
    let inserted = conn.execute(
        "INSERT INTO sessions (id, session_id, project_path, start_time, last_activity_time,
                               input_tokens, output_tokens, model_name, actual_model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            session.id.to_string(),
            session.session_id,
            session.project_path,
            to_epoch_seconds(session.start_time),
            to_epoch_seconds(session.last_activity_time),
            session.input_tokens,
            session.output_tokens,
            session.model_name,
            session.actual_model,
        ],
    )?;
    Ok(inserted)
}

fn update_session_row(conn: &Connection, session: &Session) -> Result<usize, StoreError> {
    let updated = conn.execute(
        "UPDATE sessions
         SET project_path = COALESCE(?1, project_path), start_time = ?2, last_activity_time = ?3,
             input_tokens = ?4, output_tokens = ?5, actual_model = ?6
         WHERE session_id = ?7",
        params![
            session.project_path,
            to_epoch_seconds(session.start_time),
            to_epoch_seconds(session.last_activity_time),
            session.input_tokens,
            session.output_tokens,
            session.actual_model,
            session.session_id,
        ],
    )?;
    Ok(updated)
}
