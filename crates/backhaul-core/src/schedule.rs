//! Cron schedule parsing and evaluation.
//!
//! Supports standard 5-field cron expressions:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-6, 0 = Sunday, 7 accepted as Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Expressions are validated when a backup configuration is saved, never at
//! evaluation time. Evaluation answers one question: given a reference time,
//! when is the next occurrence?

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a cron expression.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid value '{0}' in field")]
    Value(String),

    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },

    #[error("invalid range {0}-{1}")]
    Range(u32, u32),

    #[error("invalid step '{0}'")]
    Step(String),
}

/// A parsed, validated cron expression.
///
/// The original expression string is retained so configs can round-trip it
/// for display and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    expr: String,
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day_of_month: BTreeSet<u32>,
    month: BTreeSet<u32>,
    day_of_week: BTreeSet<u32>,
}

/// Parse one cron field into its admitted value set.
///
/// Accepts `*`, single values, ranges (`a-b`), steps (`*/n`, `a-b/n`) and
/// comma-separated lists of any of those.
fn parse_field(expr: &str, min: u32, max: u32) -> Result<BTreeSet<u32>, ScheduleError> {
    let mut values = BTreeSet::new();

    for part in expr.split(',') {
        let part = part.trim();

        let (range_part, step) = match part.split_once('/') {
            Some((range, step_str)) => {
                let step = step_str
                    .parse::<u32>()
                    .map_err(|_| ScheduleError::Step(step_str.to_string()))?;
                if step == 0 {
                    return Err(ScheduleError::Step(step_str.to_string()));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = a
                .parse::<u32>()
                .map_err(|_| ScheduleError::Value(range_part.to_string()))?;
            let end = b
                .parse::<u32>()
                .map_err(|_| ScheduleError::Value(range_part.to_string()))?;
            if start > end {
                return Err(ScheduleError::Range(start, end));
            }
            (start, end)
        } else {
            let value = range_part
                .parse::<u32>()
                .map_err(|_| ScheduleError::Value(range_part.to_string()))?;
            (value, value)
        };

        if start < min || end > max {
            return Err(ScheduleError::OutOfRange {
                value: if start < min { start } else { end },
                min,
                max,
            });
        }

        let mut v = start;
        while v <= end {
            values.insert(v);
            v += step;
        }
    }

    Ok(values)
}

impl CronSchedule {
    /// Parse a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScheduleError::FieldCount(parts.len()));
        }

        // Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday.
        let mut day_of_week = parse_field(parts[4], 0, 7)?;
        if day_of_week.remove(&7) {
            day_of_week.insert(0);
        }

        Ok(Self {
            expr: expr.to_string(),
            minute: parse_field(parts[0], 0, 59)?,
            hour: parse_field(parts[1], 0, 23)?,
            day_of_month: parse_field(parts[2], 1, 31)?,
            month: parse_field(parts[3], 1, 12)?,
            day_of_week,
        })
    }

    /// The original expression string.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether the given instant (truncated to the minute) matches.
    pub fn matches(&self, dt: DateTime<Utc>) -> bool {
        self.minute.contains(&dt.minute())
            && self.hour.contains(&dt.hour())
            && self.day_of_month.contains(&dt.day())
            && self.month.contains(&dt.month())
            && self.day_of_week.contains(&dt.weekday().num_days_from_sunday())
    }

    /// The next occurrence strictly after `after`.
    ///
    /// Scans forward minute by minute, skipping whole days and hours that
    /// cannot match. Returns `None` only for expressions with no occurrence
    /// within four years (e.g. Feb 30).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let limit = after + Duration::days(4 * 366);

        while t <= limit {
            let day_ok = self.month.contains(&t.month())
                && self.day_of_month.contains(&t.day())
                && self.day_of_week.contains(&t.weekday().num_days_from_sunday());
            if !day_ok {
                t = (t + Duration::days(1)).with_hour(0)?.with_minute(0)?;
                continue;
            }
            if !self.hour.contains(&t.hour()) {
                t = (t + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if self.minute.contains(&t.minute()) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            CronSchedule::parse("0 2 * *"),
            Err(ScheduleError::FieldCount(4))
        ));
        assert!(CronSchedule::parse("0 2 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(CronSchedule::parse("a b c d e").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-2 * * * *").is_err());
    }

    #[test]
    fn daily_at_two() {
        let s = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            s.next_after(utc(2025, 6, 1, 0, 0)),
            Some(utc(2025, 6, 1, 2, 0))
        );
        // Already past 02:00 -> next day
        assert_eq!(
            s.next_after(utc(2025, 6, 1, 2, 0)),
            Some(utc(2025, 6, 2, 2, 0))
        );
    }

    #[test]
    fn every_fifteen_minutes() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            s.next_after(utc(2025, 6, 1, 10, 0)),
            Some(utc(2025, 6, 1, 10, 15))
        );
        assert_eq!(
            s.next_after(utc(2025, 6, 1, 10, 50)),
            Some(utc(2025, 6, 1, 11, 0))
        );
    }

    #[test]
    fn weekly_sunday() {
        let s = CronSchedule::parse("30 3 * * 0").unwrap();
        // 2025-06-01 is a Sunday
        assert_eq!(
            s.next_after(utc(2025, 5, 30, 0, 0)),
            Some(utc(2025, 6, 1, 3, 30))
        );
        // 7 normalizes to Sunday
        let s7 = CronSchedule::parse("30 3 * * 7").unwrap();
        assert_eq!(
            s7.next_after(utc(2025, 5, 30, 0, 0)),
            Some(utc(2025, 6, 1, 3, 30))
        );
    }

    #[test]
    fn month_rollover() {
        let s = CronSchedule::parse("0 0 1 * *").unwrap();
        assert_eq!(
            s.next_after(utc(2025, 1, 15, 12, 0)),
            Some(utc(2025, 2, 1, 0, 0))
        );
    }

    #[test]
    fn year_rollover() {
        let s = CronSchedule::parse("0 0 1 1 *").unwrap();
        assert_eq!(
            s.next_after(utc(2025, 3, 1, 0, 0)),
            Some(utc(2026, 1, 1, 0, 0))
        );
    }

    #[test]
    fn impossible_date_yields_none() {
        let s = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(s.next_after(utc(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn matches_truncates_to_minute() {
        let s = CronSchedule::parse("0 2 * * *").unwrap();
        assert!(s.matches(utc(2025, 6, 1, 2, 0)));
        assert!(!s.matches(utc(2025, 6, 1, 2, 1)));
    }

    #[test]
    fn list_and_range_fields() {
        let s = CronSchedule::parse("0 8-10,22 * * 1-5").unwrap();
        // 2025-06-02 is a Monday
        assert_eq!(
            s.next_after(utc(2025, 6, 1, 0, 0)),
            Some(utc(2025, 6, 2, 8, 0))
        );
        assert_eq!(
            s.next_after(utc(2025, 6, 2, 10, 0)),
            Some(utc(2025, 6, 2, 22, 0))
        );
    }
}
