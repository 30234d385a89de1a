//! Events produced by the line parser and consumed by the reconciler.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Incremental token usage reported by one assistant response.
///
/// The counts are a delta, not a running total: applying the same event
/// twice counts it twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenUsageEvent {
    pub session_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// A prompt typed into Claude Code, taken from the history stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptEvent {
    pub session_id: Option<String>,
    pub display: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub project: Option<String>,
}

/// Any event the pipeline knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Prompt(PromptEvent),
    TokenUsage(TokenUsageEvent),
}

impl LogEvent {
    /// Session id the event refers to, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Prompt(p) => p.session_id.as_deref(),
            Self::TokenUsage(u) => Some(&u.session_id),
        }
    }
}

impl From<PromptEvent> for LogEvent {
    fn from(event: PromptEvent) -> Self {
        Self::Prompt(event)
    }
}

impl From<TokenUsageEvent> for LogEvent {
    fn from(event: TokenUsageEvent) -> Self {
        Self::TokenUsage(event)
    }
}
