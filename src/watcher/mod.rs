//! Watcher module for Claude Code log files.
//!
//! Discovers session logs, tails them incrementally with persisted offsets,
//! parses each appended line and publishes the resulting events on a bus.

mod bus;
mod directory;
mod discovery;
mod error;
mod jsonl;
mod tailer;

pub use bus::{EventBus, EventSink, DEFAULT_CHANNEL_CAPACITY};
pub use directory::{cleanup_orphaned_offsets, DirectoryWatcher, TrackedFile, DEFAULT_DEBOUNCE};
pub use discovery::{
    default_claude_dir, default_history_path, default_projects_dir, is_session_log,
    list_project_dirs, list_session_logs, AGENT_LOG_PREFIX,
};
pub use error::WatcherError;
pub use jsonl::{
    parse_line, parse_timestamp, AssistantMessage, AssistantRecord, HistoryRecord, SessionRecord,
    StreamKind, Usage, UNKNOWN_MODEL,
};
pub use tailer::{ReadOutcome, TailReader};
