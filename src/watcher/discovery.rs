//! Log path discovery utilities.
//!
//! Locates the Claude Code data directory and enumerates the session logs
//! under it.

use std::path::{Path, PathBuf};

/// Prefix of sub-agent transcripts, which share their parent's session id.
pub const AGENT_LOG_PREFIX: &str = "agent-";

/// `~/.claude`, if the home directory is known.
#[must_use]
pub fn default_claude_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude"))
}

/// `~/.claude/projects`.
#[must_use]
pub fn default_projects_dir() -> Option<PathBuf> {
    default_claude_dir().map(|dir| dir.join("projects"))
}

/// `~/.claude/history.jsonl`.
#[must_use]
pub fn default_history_path() -> Option<PathBuf> {
    default_claude_dir().map(|dir| dir.join("history.jsonl"))
}

/// Whether `path` names a session log that should be tailed on its own.
///
/// Matches `*.jsonl` except `agent-*.jsonl`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use claude_carbon::watcher::is_session_log;
///
/// assert!(is_session_log(Path::new("/p/proj/1b2c.jsonl")));
/// assert!(!is_session_log(Path::new("/p/proj/agent-1b2c.jsonl")));
/// assert!(!is_session_log(Path::new("/p/proj/notes.txt")));
/// ```
#[must_use]
pub fn is_session_log(path: &Path) -> bool {
    let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
    let is_agent = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(AGENT_LOG_PREFIX));
    is_jsonl && !is_agent
}

/// Immediate subdirectories of `root`, sorted.
///
/// Returns an empty list if `root` is missing or unreadable.
#[must_use]
pub fn list_project_dirs(root: &Path) -> Vec<PathBuf> {
    list_sorted(root, |entry| entry.file_type().is_ok_and(|t| t.is_dir()))
}

/// Session logs directly inside `dir`, sorted.
///
/// Returns an empty list if `dir` is missing or unreadable.
#[must_use]
pub fn list_session_logs(dir: &Path) -> Vec<PathBuf> {
    list_sorted(dir, |entry| {
        entry.file_type().is_ok_and(|t| t.is_file()) && is_session_log(&entry.path())
    })
}

fn list_sorted(dir: &Path, keep: impl Fn(&std::fs::DirEntry) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| keep(entry))
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_is_session_log() {
        assert!(is_session_log(Path::new("abc.jsonl")));
        assert!(!is_session_log(Path::new("agent-abc.jsonl")));
        assert!(!is_session_log(Path::new("abc.json")));
        assert!(!is_session_log(Path::new("abc")));
    }

    #[test]
    fn test_list_project_dirs_sorted() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("proj-b")).unwrap();
        fs::create_dir(root.path().join("proj-a")).unwrap();
        fs::write(root.path().join("stray.jsonl"), "").unwrap();

        let dirs = list_project_dirs(root.path());
        assert_eq!(dirs, vec![root.path().join("proj-a"), root.path().join("proj-b")]);
    }

    #[test]
    fn test_list_session_logs_filters_agents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("s2.jsonl"), "").unwrap();
        fs::write(dir.path().join("s1.jsonl"), "").unwrap();
        fs::write(dir.path().join("agent-x.jsonl"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();
        fs::create_dir(dir.path().join("sub.jsonl")).unwrap();

        let logs = list_session_logs(dir.path());
        assert_eq!(logs, vec![dir.path().join("s1.jsonl"), dir.path().join("s2.jsonl")]);
    }

    #[test]
    fn test_missing_dirs_yield_empty() {
        let path = Path::new("/nonexistent/claude-carbon/projects");
        assert!(list_project_dirs(path).is_empty());
        assert!(list_session_logs(path).is_empty());
    }

    #[test]
    fn test_default_paths_share_claude_dir() {
        if let (Some(projects), Some(history)) = (default_projects_dir(), default_history_path()) {
            assert_eq!(projects.parent(), history.parent());
            assert!(projects.ends_with(".claude/projects"));
        }
    }
}
