//! Minimal 5-field cron schedule ("MIN HOUR DOM MON DOW").
//!
//! Minute and hour fields support `*`, `*/N`, single values, and comma
//! lists; the remaining fields accept only `*`. Enough to express the
//! product's daily delivery window without a cron crate.

use chrono::{DateTime, Duration, Timelike, Utc};

/// A parsed delivery schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
}

impl CronSchedule {
    /// Parse an expression like `"0 9 * * *"` (daily at 09:00 UTC).
    pub fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        // Day-of-month, month, and day-of-week are intentionally limited.
        if fields[2] != "*" || fields[3] != "*" || fields[4] != "*" {
            return None;
        }
        Some(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
        })
    }

    /// First matching time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1)).with_second(0)?;
        candidate = candidate.with_nanosecond(0)?;

        // A minute+hour schedule always matches within 24 hours.
        for _ in 0..(24 * 60 + 1) {
            if self.minutes.contains(&candidate.minute()) && self.hours.contains(&candidate.hour())
            {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    if field.contains(',') {
        let values: std::result::Result<Vec<u32>, _> =
            field.split(',').map(|s| s.trim().parse()).collect();
        let values = values.ok()?;
        if values.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(values);
    }

    let n: u32 = field.parse().ok()?;
    (min..=max).contains(&n).then(|| vec![n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_schedule() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 7, 10, 30, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 8, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_same_day_when_not_yet_passed() {
        let schedule = CronSchedule::parse("30 21 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 7, 21, 30, 0).unwrap());
    }

    #[test]
    fn test_step_minutes() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 7, 10, 2, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_comma_list() {
        let schedule = CronSchedule::parse("0 8,20 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next.hour(), 20);
    }

    #[test]
    fn test_invalid_expressions_rejected() {
        assert!(CronSchedule::parse("bad").is_none());
        assert!(CronSchedule::parse("0 9 * *").is_none());
        assert!(CronSchedule::parse("61 9 * * *").is_none());
        assert!(CronSchedule::parse("0 9 1 * *").is_none());
        assert!(CronSchedule::parse("*/0 * * * *").is_none());
    }
}
