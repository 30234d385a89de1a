//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::default_database_path;
use crate::watcher::{default_history_path, default_projects_dir, DEFAULT_CHANNEL_CAPACITY};

/// Top-level configuration.
///
/// Every path is optional; unset paths resolve to the Claude Code defaults
/// under the home directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CarbonConfig {
    /// Root holding one subdirectory per project (`~/.claude/projects`).
    pub projects_dir: Option<PathBuf>,
    /// Prompt history file (`~/.claude/history.jsonl`).
    pub history_file: Option<PathBuf>,
    /// Usage database location.
    pub database: Option<PathBuf>,
    pub watch: WatchConfig,
}

impl CarbonConfig {
    /// Projects root, falling back to `~/.claude/projects`.
    #[must_use]
    pub fn projects_dir(&self) -> PathBuf {
        self.projects_dir
            .clone()
            .or_else(default_projects_dir)
            .unwrap_or_else(|| PathBuf::from(".claude/projects"))
    }

    /// History file, falling back to `~/.claude/history.jsonl`.
    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.history_file
            .clone()
            .or_else(default_history_path)
            .unwrap_or_else(|| PathBuf::from(".claude/history.jsonl"))
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(default_database_path)
    }
}

/// Watcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Filesystem notification debounce window.
    pub debounce_ms: u64,
    /// Periodic rescan interval; 0 disables it.
    pub safety_tick_secs: u64,
    /// Per-subscriber event queue depth.
    pub channel_capacity: usize,
    /// Tail the prompt history file.
    pub history: bool,
    /// Process history written before the first run instead of skipping it.
    pub replay_history_backlog: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            safety_tick_secs: 30,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            history: true,
            replay_history_backlog: false,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn safety_tick(&self) -> Option<Duration> {
        (self.safety_tick_secs > 0).then(|| Duration::from_secs(self.safety_tick_secs))
    }
}
