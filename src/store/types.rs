//! Session records and the rollups computed from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model name recorded for sessions before any usage is observed.
pub const DEFAULT_MODEL_NAME: &str = "sonnet";

/// Aggregated usage for one Claude Code session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Internal row id.
    pub id: Uuid,
    /// Claude Code session id (unique).
    pub session_id: String,
    pub project_path: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Declared model name.
    pub model_name: String,
    /// Model seen in real usage records, once any arrived.
    pub actual_model: Option<String>,
}

impl Session {
    /// Create an empty session starting (and last active) at `at`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            project_path: None,
            start_time: at,
            last_activity_time: at,
            input_tokens: 0,
            output_tokens: 0,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            actual_model: None,
        }
    }

    /// Set the project path.
    #[must_use]
    pub fn with_project(mut self, project_path: Option<String>) -> Self {
        self.project_path = project_path;
        self
    }

    /// Input plus output tokens.
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// The observed model if known, otherwise the declared one.
    #[must_use]
    pub fn effective_model(&self) -> &str {
        self.actual_model.as_deref().unwrap_or(&self.model_name)
    }

    /// Time between first and last activity, never negative.
    #[must_use]
    pub fn active_duration(&self) -> Duration {
        (self.last_activity_time - self.start_time).max(Duration::zero())
    }
}

/// Reporting window for aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Since local midnight.
    Today,
    /// Since local midnight `n` days ago.
    TrailingDays(u32),
    /// Everything ever recorded.
    AllTime,
}

impl Period {
    /// The trailing seven days.
    #[must_use]
    pub fn week() -> Self {
        Self::TrailingDays(7)
    }

    /// Lower bound on last-activity time for this period, relative to `now`.
    ///
    /// Returns `None` for [`Period::AllTime`].
    #[must_use]
    pub fn lower_bound<Tz: TimeZone>(self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let days_back = match self {
            Self::AllTime => return None,
            Self::Today => 0,
            Self::TrailingDays(n) => i64::from(n),
        };
        let day = now.date_naive() - Duration::days(days_back);
        let midnight = day.and_hms_opt(0, 0, 0)?;
        now.timezone()
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Lower bound relative to the current local time.
    #[must_use]
    pub fn lower_bound_now(self) -> Option<DateTime<Utc>> {
        self.lower_bound(&Local::now())
    }
}

/// Token totals for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub sessions: u64,
}

impl ModelUsage {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Token totals for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub sessions: u64,
    /// Sum of the active durations of the day's sessions.
    pub active_seconds: i64,
}

impl DailyUsage {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Tokens attributed to one hour of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyUsage {
    /// Hour of day, 0-23.
    pub hour: u32,
    pub tokens: u64,
}

/// Tokens consumed per second of active session time on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnRatePoint {
    pub date: NaiveDate,
    pub tokens: u64,
    pub active_seconds: i64,
    pub tokens_per_second: f64,
}

impl BurnRatePoint {
    #[must_use]
    pub fn tokens_per_hour(&self) -> f64 {
        self.tokens_per_second * 3600.0
    }
}

/// Bucket sessions by the day (in `tz`) of their last activity.
///
/// Days come back oldest first; days with no sessions are omitted.
#[must_use]
pub fn daily_usage<Tz: TimeZone>(sessions: &[Session], tz: &Tz) -> Vec<DailyUsage> {
    let mut days: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();
    for session in sessions {
        let date = session.last_activity_time.with_timezone(tz).date_naive();
        let day = days.entry(date).or_insert_with(|| DailyUsage {
            date,
            input_tokens: 0,
            output_tokens: 0,
            sessions: 0,
            active_seconds: 0,
        });
        day.input_tokens += session.input_tokens;
        day.output_tokens += session.output_tokens;
        day.sessions += 1;
        day.active_seconds += session.active_duration().num_seconds();
    }
    days.into_values().collect()
}

/// Tokens per hour of `day` (in `tz`), always 24 buckets.
#[must_use]
pub fn hourly_usage<Tz: TimeZone>(sessions: &[Session], day: NaiveDate, tz: &Tz) -> Vec<HourlyUsage> {
    let mut buckets: Vec<HourlyUsage> = (0..24).map(|hour| HourlyUsage { hour, tokens: 0 }).collect();
    for session in sessions {
        let local = session.last_activity_time.with_timezone(tz);
        if local.date_naive() != day {
            continue;
        }
        if let Some(bucket) = buckets.get_mut(local.hour() as usize) {
            bucket.tokens += session.total_tokens();
        }
    }
    buckets
}

/// Burn rate per day, derived from [`daily_usage`].
///
/// Days without any active time report a rate of zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn burn_rate_by_day<Tz: TimeZone>(sessions: &[Session], tz: &Tz) -> Vec<BurnRatePoint> {
    daily_usage(sessions, tz)
        .into_iter()
        .map(|day| {
            let tokens = day.total_tokens();
            let tokens_per_second = if day.active_seconds > 0 {
                tokens as f64 / day.active_seconds as f64
            } else {
                0.0
            };
            BurnRatePoint {
                date: day.date,
                tokens,
                active_seconds: day.active_seconds,
                tokens_per_second,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn session(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, input: u64, output: u64) -> Session {
        let mut s = Session::new(id, start);
        s.last_activity_time = end;
        s.input_tokens = input;
        s.output_tokens = output;
        s
    }

    #[test]
    fn test_new_session_defaults() {
        let now = Utc::now();
        let s = Session::new("abc", now);
        assert_eq!(s.start_time, now);
        assert_eq!(s.last_activity_time, now);
        assert_eq!(s.total_tokens(), 0);
        assert_eq!(s.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(s.effective_model(), DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_effective_model_prefers_actual() {
        let mut s = Session::new("abc", Utc::now());
        s.actual_model = Some("claude-opus-4".to_string());
        assert_eq!(s.effective_model(), "claude-opus-4");
    }

    #[test]
    fn test_active_duration_never_negative() {
        let s = session("a", at(2026, 1, 2, 10, 0), at(2026, 1, 2, 9, 0), 0, 0);
        assert_eq!(s.active_duration(), Duration::zero());
    }

    #[test]
    fn test_period_lower_bounds() {
        let now = at(2026, 3, 10, 15, 30);
        assert_eq!(Period::Today.lower_bound(&now), Some(at(2026, 3, 10, 0, 0)));
        assert_eq!(Period::week().lower_bound(&now), Some(at(2026, 3, 3, 0, 0)));
        assert_eq!(Period::AllTime.lower_bound(&now), None);
    }

    #[test]
    fn test_daily_usage_groups_by_last_activity_day() {
        let sessions = vec![
            session("a", at(2026, 1, 1, 9, 0), at(2026, 1, 1, 9, 30), 100, 50),
            session("b", at(2026, 1, 1, 22, 0), at(2026, 1, 2, 1, 0), 10, 5),
            session("c", at(2026, 1, 2, 12, 0), at(2026, 1, 2, 12, 10), 1, 1),
        ];

        let days = daily_usage(&sessions, &Utc);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(days[0].total_tokens(), 150);
        assert_eq!(days[0].active_seconds, 1800);
        assert_eq!(days[1].sessions, 2);
        assert_eq!(days[1].total_tokens(), 17);
        assert_eq!(days[1].active_seconds, 3 * 3600 + 600);
    }

    #[test]
    fn test_hourly_usage_has_24_buckets() {
        let sessions = vec![
            session("a", at(2026, 1, 1, 9, 0), at(2026, 1, 1, 9, 30), 100, 50),
            session("b", at(2026, 1, 1, 9, 0), at(2026, 1, 1, 9, 45), 10, 0),
            session("c", at(2026, 1, 1, 13, 0), at(2026, 1, 1, 13, 5), 7, 3),
            session("other-day", at(2026, 1, 2, 9, 0), at(2026, 1, 2, 9, 5), 999, 0),
        ];

        let hours = hourly_usage(&sessions, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(), &Utc);
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[9].tokens, 160);
        assert_eq!(hours[13].tokens, 10);
        assert_eq!(hours.iter().map(|h| h.tokens).sum::<u64>(), 170);
    }

    #[test]
    fn test_burn_rate_by_day() {
        let sessions = vec![
            session("a", at(2026, 1, 1, 9, 0), at(2026, 1, 1, 9, 0) + Duration::seconds(100), 600, 400),
            session("idle", at(2026, 1, 2, 9, 0), at(2026, 1, 2, 9, 0), 50, 0),
        ];

        let rates = burn_rate_by_day(&sessions, &Utc);
        assert_eq!(rates.len(), 2);
        assert!((rates[0].tokens_per_second - 10.0).abs() < f64::EPSILON);
        assert!((rates[0].tokens_per_hour() - 36_000.0).abs() < f64::EPSILON);
        assert!(rates[1].tokens_per_second.abs() < f64::EPSILON);
    }
}
