//! Persistent store for session aggregates and file read offsets.

mod error;
mod schema;
mod types;
mod usage;

pub use error::StoreError;
pub use schema::{SCHEMA, SCHEMA_VERSION};
pub use types::{
    burn_rate_by_day, daily_usage, hourly_usage, BurnRatePoint, DailyUsage, HourlyUsage,
    ModelUsage, Period, Session, DEFAULT_MODEL_NAME,
};
pub use usage::{default_database_path, UsageApplied, UsageStore};
