//! Line parser for Claude Code JSONL streams.
//!
//! Two streams are understood: the prompt history at
//! `~/.claude/history.jsonl` and the per-session transcripts under
//! `~/.claude/projects/<project>/*.jsonl`. Each line decodes into at most one
//! [`LogEvent`]; anything else is discarded without error.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::events::{LogEvent, PromptEvent, TokenUsageEvent};

/// Model name used when an assistant record does not name one.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Which stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// `history.jsonl`: one record per submitted prompt.
    History,
    /// A session transcript.
    Session,
}

/// One line of `history.jsonl`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub display: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// One line of a session transcript.
///
/// Only assistant responses are modelled; user messages, summaries,
/// snapshots and every future record type fall into `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionRecord {
    Assistant(AssistantRecord),
    #[serde(other)]
    Other,
}

/// Assistant response entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRecord {
    pub session_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub message: AssistantMessage,
}

/// Assistant message with model and usage info.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Token usage block of an assistant message.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Decode one line from `kind` into an event.
///
/// Returns `None` for blank lines, malformed JSON and records that carry
/// nothing the pipeline uses.
#[must_use]
pub fn parse_line(kind: StreamKind, line: &str) -> Option<LogEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match kind {
        StreamKind::History => parse_history_line(line).map(LogEvent::Prompt),
        StreamKind::Session => parse_session_line(line).map(LogEvent::TokenUsage),
    }
}

fn parse_history_line(line: &str) -> Option<PromptEvent> {
    let record = match serde_json::from_str::<HistoryRecord>(line) {
        Ok(record) => record,
        Err(e) => {
            tracing::trace!(error = %e, "Discarding unparseable history line");
            return None;
        }
    };
    if record.session_id.is_none() && record.display.is_none() {
        return None;
    }
    Some(PromptEvent {
        session_id: record.session_id,
        display: record.display,
        timestamp: record.timestamp.and_then(from_epoch_millis),
        project: record.project,
    })
}

fn parse_session_line(line: &str) -> Option<TokenUsageEvent> {
    let record = match serde_json::from_str::<SessionRecord>(line) {
        Ok(SessionRecord::Assistant(record)) => record,
        Ok(SessionRecord::Other) => return None,
        Err(e) => {
            tracing::trace!(error = %e, "Discarding unparseable session line");
            return None;
        }
    };
    let usage = record.message.usage?;
    Some(TokenUsageEvent {
        session_id: record.session_id,
        model: record
            .message
            .model
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string()),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        timestamp: record
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
    })
}

/// Parse an ISO-8601 timestamp such as `2026-01-29T10:00:00.123Z`.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(millis.round() as i64)
}
