//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Each field accepts `*`, single values, ranges (`1-5`), lists (`1,3,5`)
//! and steps (`*/15`, `0-30/10`, `5/20`). Day-of-week runs 0-6 from Sunday;
//! 7 is accepted as Sunday too. Times are evaluated in UTC.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use flowcore::DispatchError;

/// Upper bound on search steps; enough for several years of sparse schedules.
const MAX_SEARCH_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, DispatchError> {
        let invalid = |reason: String| DispatchError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], 0, 59).map_err(&invalid)?;
        let hours = parse_field(fields[1], 0, 23).map_err(&invalid)?;
        let days_of_month = parse_field(fields[2], 1, 31).map_err(&invalid)?;
        let months = parse_field(fields[3], 1, 12).map_err(&invalid)?;
        let mut days_of_week = parse_field(fields[4], 0, 7).map_err(&invalid)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        for _ in 0..MAX_SEARCH_STEPS {
            if !bit(self.months, candidate.month()) {
                let (year, month) = if candidate.month() == 12 {
                    (candidate.year() + 1, 1)
                } else {
                    (candidate.year(), candidate.month() + 1)
                };
                candidate = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(candidate) {
                let next_day = candidate.date_naive().succ_opt()?;
                candidate = Utc.from_utc_datetime(&next_day.and_hms_opt(0, 0, 0)?);
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }
        None
    }

    /// Standard cron semantics: when both day fields are restricted, either
    /// may match.
    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, at.day());
        let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, min, max)?, parse_value(hi, min, max)?)
        } else {
            let start = parse_value(range, min, max)?;
            // "5/20" means every 20 starting at 5
            (start, if part.contains('/') { max } else { start })
        };

        if start > end {
            return Err(format!("range {}-{} is reversed", start, end));
        }
        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }
    Ok(mask)
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value '{}'", text))?;
    if value < min || value > max {
        return Err(format!("value {} out of range {}-{}", value, min, max));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 10, 7)), Some(at(2024, 1, 1, 10, 15)));
        assert_eq!(cron.next_after(at(2024, 1, 1, 10, 45)), Some(at(2024, 1, 1, 11, 0)));
    }

    #[test]
    fn test_daily_rolls_over_month_and_year() {
        let cron = CronSchedule::parse("30 2 * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 12, 31, 3, 0)), Some(at(2025, 1, 1, 2, 30)));
    }

    #[test]
    fn test_weekday_field() {
        // 2024-01-01 was a Monday
        let cron = CronSchedule::parse("0 9 * * 1-5").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 5, 10, 0)), Some(at(2024, 1, 8, 9, 0)));

        let sunday = CronSchedule::parse("0 0 * * 7").unwrap();
        assert_eq!(sunday.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 7, 0, 0)));
    }

    #[test]
    fn test_lists_and_offset_steps() {
        let cron = CronSchedule::parse("5/20 0,12 1 * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 1, 0, 5)), Some(at(2024, 3, 1, 0, 25)));
        assert_eq!(cron.next_after(at(2024, 3, 1, 0, 45)), Some(at(2024, 3, 1, 12, 5)));
    }

    #[test]
    fn test_impossible_date_yields_none() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("10-5 * * * *").is_err());
    }
}
