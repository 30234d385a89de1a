//! End-to-end tests for the ingestion pipeline: discovery, tailing,
//! parsing and reconciliation into the store.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use claude_carbon::config::{CarbonConfig, WatchConfig};
use claude_carbon::monitor::Monitor;
use claude_carbon::store::UsageStore;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Fixture {
    dir: TempDir,
    store: UsageStore,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join("projects")).expect("Failed to create projects dir");
        let store = UsageStore::open(dir.path().join("usage.db"))
            .await
            .expect("Failed to open store");
        Self { dir, store }
    }

    fn projects(&self) -> PathBuf {
        self.dir.path().join("projects")
    }

    fn history(&self) -> PathBuf {
        self.dir.path().join("history.jsonl")
    }

    fn config(&self) -> CarbonConfig {
        CarbonConfig {
            projects_dir: Some(self.projects()),
            history_file: Some(self.history()),
            database: None,
            watch: WatchConfig {
                debounce_ms: 20,
                safety_tick_secs: 1,
                replay_history_backlog: true,
                ..WatchConfig::default()
            },
        }
    }

    fn monitor(&self) -> Monitor {
        Monitor::new(self.config(), self.store.clone())
    }

    async fn wait_for_tokens(&self, session_id: &str, expected: u64) {
        let result = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(session) = self.store.get_session(session_id).await.expect("query failed") {
                    if session.total_tokens() == expected {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        let actual = self
            .store
            .get_session(session_id)
            .await
            .expect("query failed")
            .map(|s| s.total_tokens());
        assert!(result.is_ok(), "session {session_id} expected {expected} tokens, found {actual:?}");
    }

    async fn wait_for_offset(&self, path: &Path, expected: u64) {
        let result = tokio::time::timeout(WAIT, async {
            while self.store.get_offset(path).await.expect("query failed") != Some(expected) {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "offset of {} never reached {expected}", path.display());
    }
}

fn usage_line(session: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"type":"assistant","uuid":"u","sessionId":"{session}","timestamp":"2026-01-29T10:00:00.500Z","message":{{"role":"assistant","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":{input},"output_tokens":{output}}}}}}}"#
    )
}

fn user_line(session: &str) -> String {
    format!(
        r#"{{"type":"user","uuid":"q","sessionId":"{session}","timestamp":"2026-01-29T09:59:59Z","message":{{"role":"user","content":"hi"}}}}"#
    )
}

fn append(path: &Path, lines: &[String]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("Failed to open log for append");
    for line in lines {
        writeln!(file, "{line}").expect("Failed to append line");
    }
    file.flush().expect("Failed to flush log");
}

/// Test that a project directory created after startup is discovered and
/// its log is counted exactly once.
#[tokio::test]
async fn test_new_project_directory_counted_once() {
    let fx = Fixture::new().await;
    let handle = fx.monitor().start();

    let project = fx.projects().join("proj2");
    fs::create_dir(&project).expect("Failed to create project dir");
    let log = project.join("session1.jsonl");
    append(
        &log,
        &[
            user_line("s-new"),
            usage_line("s-new", 100, 20),
            usage_line("s-new", 50, 30),
        ],
    );
    append(&project.join("agent-9.jsonl"), &[usage_line("s-new", 1_000, 1_000)]);

    fx.wait_for_tokens("s-new", 200).await;
    // A few more safety ticks must not change anything.
    tokio::time::sleep(Duration::from_millis(2_200)).await;
    let stats = handle.stop().await;

    let session = fx.store.get_session("s-new").await.unwrap().unwrap();
    assert_eq!((session.input_tokens, session.output_tokens), (150, 50));
    assert_eq!(session.actual_model.as_deref(), Some("claude-sonnet-4-20250514"));
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.created, 1);
}

/// Test that appended lines are picked up incrementally.
#[tokio::test]
async fn test_appends_are_incremental() {
    let fx = Fixture::new().await;
    let project = fx.projects().join("app");
    fs::create_dir(&project).unwrap();
    let log = project.join("abc.jsonl");
    append(&log, &[usage_line("abc", 100, 50)]);

    let handle = fx.monitor().start();
    fx.wait_for_tokens("abc", 150).await;

    append(&log, &[usage_line("abc", 20, 5)]);
    fx.wait_for_tokens("abc", 175).await;
    handle.stop().await;

    let session = fx.store.get_session("abc").await.unwrap().unwrap();
    assert_eq!((session.input_tokens, session.output_tokens), (120, 55));
    assert_eq!(
        fx.store.get_offset(&log).await.unwrap(),
        Some(fs::metadata(&log).unwrap().len())
    );
}

/// Test that restarting resumes from persisted offsets without
/// double-counting.
#[tokio::test]
async fn test_restart_does_not_double_count() {
    let fx = Fixture::new().await;
    let project = fx.projects().join("app");
    fs::create_dir(&project).unwrap();
    let log = project.join("r.jsonl");
    append(&log, &[usage_line("r", 10, 10), usage_line("r", 10, 10)]);

    let handle = fx.monitor().start();
    fx.wait_for_tokens("r", 40).await;
    handle.stop().await;

    append(&log, &[usage_line("r", 5, 5)]);
    let handle = fx.monitor().start();
    fx.wait_for_tokens("r", 50).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    let session = fx.store.get_session("r").await.unwrap().unwrap();
    assert_eq!(session.total_tokens(), 50);
}

/// Test that truncating a log resets its offset and only the rewritten
/// content is counted.
#[tokio::test]
async fn test_truncation_counts_only_new_content() {
    let fx = Fixture::new().await;
    let project = fx.projects().join("app");
    fs::create_dir(&project).unwrap();
    let log = project.join("t.jsonl");

    let mut lines = Vec::new();
    while lines.iter().map(|l: &String| l.len() + 1).sum::<usize>() < 5_000 {
        lines.push(usage_line("t", 1, 1));
    }
    append(&log, &lines);
    let first_total = 2 * lines.len() as u64;

    let handle = fx.monitor().start();
    fx.wait_for_tokens("t", first_total).await;

    fs::write(&log, "").expect("Failed to truncate log");
    fx.wait_for_offset(&log, 0).await;
    append(&log, &[usage_line("t", 7, 3)]);
    fx.wait_for_tokens("t", first_total + 10).await;
    handle.stop().await;

    let session = fx.store.get_session("t").await.unwrap().unwrap();
    assert_eq!(session.total_tokens(), first_total + 10);
    assert_eq!(
        fx.store.get_offset(&log).await.unwrap(),
        Some(fs::metadata(&log).unwrap().len())
    );
}

/// Test that a prompt in the history file creates the session and later
/// usage accumulates onto the same row.
#[tokio::test]
async fn test_history_prompt_then_usage() {
    let fx = Fixture::new().await;
    append(
        &fx.history(),
        &[r#"{"display":"refactor the parser","timestamp":1769680800000,"project":"/home/user/app","sessionId":"xyz"}"#.to_string()],
    );

    let handle = fx.monitor().start();
    let result = tokio::time::timeout(WAIT, async {
        while fx.store.get_session("xyz").await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "prompt never created a session");

    let project = fx.projects().join("app");
    fs::create_dir(&project).unwrap();
    append(&project.join("xyz.jsonl"), &[usage_line("xyz", 40, 2)]);
    fx.wait_for_tokens("xyz", 42).await;
    handle.stop().await;

    assert_eq!(fx.store.count_sessions().await.unwrap(), 1);
    let session = fx.store.get_session("xyz").await.unwrap().unwrap();
    assert_eq!(session.project_path.as_deref(), Some("/home/user/app"));
}

/// Test that offsets of files removed while not running are cleaned up.
#[tokio::test]
async fn test_orphaned_offsets_removed_on_start() {
    let fx = Fixture::new().await;
    let gone = fx.projects().join("gone").join("old.jsonl");
    fx.store.set_offset(&gone, 123).await.unwrap();

    let handle = fx.monitor().start();
    let result = tokio::time::timeout(WAIT, async {
        while fx.store.get_offset(&gone).await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    handle.stop().await;
    assert!(result.is_ok(), "orphaned offset was not removed");
}
