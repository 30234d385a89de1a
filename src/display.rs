//! Colored CLI display utilities for usage reports.
//!
//! Rendering lives here so the store and pipeline only ever hand over
//! plain query results.

use std::io::{self, Write};

use chrono::{Local, Utc};
use owo_colors::OwoColorize;

use crate::events::LogEvent;
use crate::store::{BurnRatePoint, DailyUsage, HourlyUsage, ModelUsage, Session};

/// Width of the widest bar in bar charts.
const BAR_WIDTH: usize = 40;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis
/// if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Compact token count: `950`, `12.3K`, `4.56M`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_tokens(tokens: u64) -> String {
    match tokens {
        0..=999 => tokens.to_string(),
        1_000..=999_999 => format!("{:.1}K", tokens as f64 / 1_000.0),
        _ => format!("{:.2}M", tokens as f64 / 1_000_000.0),
    }
}

/// Human duration from seconds: `45s`, `12m`, `3h 05m`.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    match seconds {
        0..=59 => format!("{seconds}s"),
        60..=3599 => format!("{}m", seconds / 60),
        _ => format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60),
    }
}

fn bar(value: u64, max: u64) -> String {
    if max == 0 || value == 0 {
        return String::new();
    }
    let width = usize::try_from(value.saturating_mul(BAR_WIDTH as u64) / max).unwrap_or(BAR_WIDTH);
    "█".repeat(width.max(1))
}

/// Print per-model totals for a period.
pub fn print_model_usage(title: &str, usage: &[ModelUsage]) {
    println!("{}", title.bold());
    if usage.is_empty() {
        println!("  {}", "No usage recorded".dimmed());
        return;
    }
    let total: u64 = usage.iter().map(ModelUsage::total_tokens).sum();
    let sessions: u64 = usage.iter().map(|m| m.sessions).sum();
    for model in usage {
        println!(
            "  {:<32} {:>9} in {:>9} out {:>9} total  {} sessions",
            truncate(&model.model, 32).cyan(),
            format_tokens(model.input_tokens),
            format_tokens(model.output_tokens),
            format_tokens(model.total_tokens()).bold(),
            model.sessions
        );
    }
    println!(
        "  {:<32} {:>33}  {} sessions",
        "Total".bold(),
        format_tokens(total).green().bold(),
        sessions
    );
}

/// Print one row per day with a token bar.
pub fn print_daily(days: &[DailyUsage]) {
    println!("{}", "Daily usage".bold());
    if days.is_empty() {
        println!("  {}", "No usage recorded".dimmed());
        return;
    }
    let max = days.iter().map(DailyUsage::total_tokens).max().unwrap_or(0);
    for day in days {
        println!(
            "  {} {:>9} {:>4} sessions {:>8} active  {}",
            day.date.format("%Y-%m-%d").dimmed(),
            format_tokens(day.total_tokens()),
            day.sessions,
            format_duration(day.active_seconds),
            bar(day.total_tokens(), max).blue()
        );
    }
}

/// Print today's usage by hour.
pub fn print_hourly(hours: &[HourlyUsage]) {
    println!("{} ({})", "Today by hour".bold(), Local::now().format("%Y-%m-%d"));
    let max = hours.iter().map(|h| h.tokens).max().unwrap_or(0);
    for hour in hours {
        println!(
            "  {:02}:00 {:>9}  {}",
            hour.hour,
            format_tokens(hour.tokens),
            bar(hour.tokens, max).magenta()
        );
    }
}

/// Print tokens per hour of active session time, per day.
pub fn print_burn_rate(points: &[BurnRatePoint]) {
    println!("{}", "Burn rate".bold());
    if points.is_empty() {
        println!("  {}", "No usage recorded".dimmed());
        return;
    }
    for point in points {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let per_hour = point.tokens_per_hour().round().max(0.0) as u64;
        println!(
            "  {} {:>9}/h over {}",
            point.date.format("%Y-%m-%d").dimmed(),
            format_tokens(per_hour).yellow(),
            format_duration(point.active_seconds)
        );
    }
}

/// Print a session table, most recent first.
pub fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("{}", "No sessions recorded".dimmed());
        return;
    }
    for session in sessions {
        println!(
            "{} {} {:>9} {:>8}  {} {}",
            session
                .last_activity_time
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .dimmed(),
            truncate(&session.session_id, 12).cyan(),
            format_tokens(session.total_tokens()).bold(),
            format_duration(session.active_duration().num_seconds()),
            truncate(session.effective_model(), 28),
            session
                .project_path
                .as_deref()
                .map(|p| truncate(p, 40))
                .unwrap_or_default()
                .dimmed()
        );
    }
}

/// Print one line for a live event in watch mode.
pub fn print_event(event: &LogEvent) {
    match event {
        LogEvent::Prompt(prompt) => println!(
            "{} {} session={} {}",
            timestamp().dimmed(),
            "[PROMPT]".blue().bold(),
            prompt.session_id.as_deref().map(|id| truncate(id, 12)).unwrap_or_default(),
            prompt
                .display
                .as_deref()
                .map(|d| truncate(d, 60))
                .unwrap_or_default()
                .dimmed()
        ),
        LogEvent::TokenUsage(usage) => println!(
            "{} {} session={} model={} in={} out={}",
            timestamp().dimmed(),
            "[USAGE]".green().bold(),
            truncate(&usage.session_id, 12),
            usage.model.cyan(),
            format_tokens(usage.input_tokens),
            format_tokens(usage.output_tokens)
        ),
    }
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly10!", 10), "exactly10!");
        assert_eq!(truncate("this is too long", 10), "this is...");
        assert_eq!(truncate("abc", 2), "...");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(950), "950");
        assert_eq!(format_tokens(12_345), "12.3K");
        assert_eq!(format_tokens(4_560_000), "4.56M");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(720), "12m");
        assert_eq!(format_duration(3 * 3600 + 5 * 60), "3h 05m");
    }

    #[test]
    fn test_bar_scales_to_max() {
        assert_eq!(bar(0, 10), "");
        assert_eq!(bar(10, 10).chars().count(), BAR_WIDTH);
        assert_eq!(bar(5, 10).chars().count(), BAR_WIDTH / 2);
        assert_eq!(bar(1, 1_000_000).chars().count(), 1);
    }
}
