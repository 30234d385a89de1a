//! Claude Carbon - token usage tracking for Claude Code sessions.
//!
//! Tails the JSONL logs Claude Code writes under `~/.claude`, folds every
//! assistant response's token usage into per-session totals and persists
//! them in `SQLite` for reporting.

pub mod config;
pub mod display;
pub mod events;
pub mod monitor;
pub mod reconciler;
pub mod store;
pub mod watcher;
