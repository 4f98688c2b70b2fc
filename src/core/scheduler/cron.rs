//! Five-field cron specs (`minute hour day month day-of-week`) where each
//! field is `*` or a literal. Day-of-week counts from Monday = 0.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};
use std::fmt;
use std::str::FromStr;

const WEEKDAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];
/// `next_after` gives up after this many days without a match.
const SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day month day-of-week), got {0}")]
    FieldCount(usize),
    #[error("invalid {field} value '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("{field} value {value} is outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidClock(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    Any,
    At(u32),
}

impl CronField {
    fn parse(field: &'static str, text: &str, min: u32, max: u32) -> Result<Self, CronError> {
        if text == "*" {
            return Ok(CronField::Any);
        }
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
            return Err(CronError::InvalidField {
                field,
                value: text.to_string(),
            });
        }
        let value: u32 = text.parse().map_err(|_| CronError::InvalidField {
            field,
            value: text.to_string(),
        })?;
        if value < min || value > max {
            return Err(CronError::OutOfRange {
                field,
                value,
                min,
                max,
            });
        }
        Ok(CronField::At(value))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::At(v) => *v == value,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => f.write_str("*"),
            CronField::At(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSpec {
    pub minute: CronField,
    pub hour: CronField,
    pub day: CronField,
    pub month: CronField,
    pub weekday: CronField,
}

impl FromStr for CronSpec {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        Ok(Self {
            minute: CronField::parse("minute", fields[0], 0, 59)?,
            hour: CronField::parse("hour", fields[1], 0, 23)?,
            day: CronField::parse("day", fields[2], 1, 31)?,
            month: CronField::parse("month", fields[3], 1, 12)?,
            weekday: CronField::parse("day-of-week", fields[4], 0, 6)?,
        })
    }
}

impl fmt::Display for CronSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday
        )
    }
}

impl CronSpec {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            minute: CronField::At(minute),
            hour: CronField::At(hour),
            day: CronField::Any,
            month: CronField::Any,
            weekday: CronField::Any,
        }
    }

    /// Parse a `HH:MM` time of day into a daily spec.
    pub fn daily_at(clock: &str) -> Result<Self, CronError> {
        let invalid = || CronError::InvalidClock(clock.to_string());
        let (h, m) = clock.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 || m.len() != 2 {
            return Err(invalid());
        }
        Ok(Self::daily(hour, minute))
    }

    /// Six-field expression (seconds first) for the cron runtime.
    pub fn to_scheduler_expr(&self) -> String {
        let weekday = match self.weekday {
            CronField::Any => "*".to_string(),
            CronField::At(d) => WEEKDAYS[d as usize].to_string(),
        };
        format!(
            "0 {} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, weekday
        )
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.day.matches(date.day())
            && self.month.matches(date.month())
            && self.weekday.matches(date.weekday().num_days_from_monday())
    }

    fn matches_naive(&self, t: &NaiveDateTime) -> bool {
        self.matches_date(t.date())
            && self.hour.matches(t.hour())
            && self.minute.matches(t.minute())
    }

    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        self.matches_naive(&t.naive_local())
    }

    /// First firing strictly after `now`, in `now`'s time zone.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let start = truncate_minute(now.naive_local()) + Duration::minutes(1);
        let limit = start + Duration::days(SEARCH_DAYS);

        let mut t = start;
        while t < limit {
            if !self.matches_date(t.date()) {
                t = t.date().and_time(NaiveTime::MIN) + Duration::days(1);
                continue;
            }
            if !self.hour.matches(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if self.minute.matches(t.minute()) {
                if let Some(resolved) = tz.from_local_datetime(&t).earliest() {
                    return Some(resolved);
                }
            }
            t += Duration::minutes(1);
        }
        None
    }

    /// Most recent firing in `(now - window, now]`, if any.
    pub fn last_fire_within<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        window: Duration,
    ) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let mut t = truncate_minute(now.naive_local());
        let floor = now.naive_local() - window;
        while t > floor {
            if self.matches_naive(&t) {
                if let Some(resolved) = tz.from_local_datetime(&t).earliest() {
                    return Some(resolved);
                }
            }
            t -= Duration::minutes(1);
        }
        None
    }
}

fn truncate_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date()
        .and_hms_opt(t.hour(), t.minute(), 0)
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_literals_and_wildcards() {
        let spec: CronSpec = "30 7 * * *".parse().unwrap();
        assert_eq!(spec, CronSpec::daily(7, 30));
        assert_eq!(spec.to_string(), "30 7 * * *");

        let spec: CronSpec = "0 22 15 6 4".parse().unwrap();
        assert_eq!(spec.weekday, CronField::At(4));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!("30 7 * *".parse::<CronSpec>(), Err(CronError::FieldCount(4)));
        assert!(matches!(
            "*/5 7 * * *".parse::<CronSpec>(),
            Err(CronError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            "-1 7 * * *".parse::<CronSpec>(),
            Err(CronError::InvalidField { .. })
        ));
        assert!(matches!(
            "0 24 * * *".parse::<CronSpec>(),
            Err(CronError::OutOfRange { field: "hour", value: 24, .. })
        ));
        assert!(matches!(
            "0 0 0 * *".parse::<CronSpec>(),
            Err(CronError::OutOfRange { field: "day", .. })
        ));
        assert!(matches!(
            "0 0 * 13 *".parse::<CronSpec>(),
            Err(CronError::OutOfRange { field: "month", .. })
        ));
        assert!(matches!(
            "0 0 * * 7".parse::<CronSpec>(),
            Err(CronError::OutOfRange { field: "day-of-week", .. })
        ));
    }

    #[test]
    fn clock_time_becomes_daily_spec() {
        assert_eq!(CronSpec::daily_at("07:05").unwrap().to_string(), "5 7 * * *");
        assert_eq!(CronSpec::daily_at("23:59").unwrap(), CronSpec::daily(23, 59));
        for bad in ["24:00", "7", "07:60", "ab:cd", "07:5"] {
            assert!(CronSpec::daily_at(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn scheduler_expression_has_seconds_and_day_names() {
        assert_eq!(CronSpec::daily(7, 30).to_scheduler_expr(), "0 30 7 * * *");
        let spec: CronSpec = "0 9 * * 0".parse().unwrap();
        assert_eq!(spec.to_scheduler_expr(), "0 0 9 * * MON");
        let spec: CronSpec = "15 18 * * 6".parse().unwrap();
        assert_eq!(spec.to_scheduler_expr(), "0 15 18 * * SUN");
    }

    #[test]
    fn matches_uses_monday_zero() {
        let spec: CronSpec = "0 9 * * 0".parse().unwrap();
        // 2024-01-01 was a Monday.
        assert!(spec.matches(&at(2024, 1, 1, 9, 0, 0)));
        assert!(!spec.matches(&at(2024, 1, 2, 9, 0, 0)));
    }

    #[test]
    fn next_after_is_strictly_later() {
        let spec = CronSpec::daily(7, 30);
        assert_eq!(
            spec.next_after(&at(2024, 3, 10, 7, 30, 0)),
            Some(at(2024, 3, 11, 7, 30, 0))
        );
        assert_eq!(
            spec.next_after(&at(2024, 3, 10, 6, 59, 59)),
            Some(at(2024, 3, 10, 7, 30, 0))
        );
    }

    #[test]
    fn next_after_crosses_months_and_leap_days() {
        let spec: CronSpec = "0 0 29 2 *".parse().unwrap();
        assert_eq!(
            spec.next_after(&at(2024, 3, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
        let never: CronSpec = "0 0 31 2 *".parse().unwrap();
        assert_eq!(never.next_after(&at(2024, 3, 1, 0, 0, 0)), None);
    }

    #[test]
    fn last_fire_within_window() {
        let spec = CronSpec::daily(7, 30);
        let now = at(2024, 3, 10, 8, 10, 42);
        assert_eq!(
            spec.last_fire_within(&now, Duration::hours(1)),
            Some(at(2024, 3, 10, 7, 30, 0))
        );
        assert_eq!(spec.last_fire_within(&now, Duration::minutes(30)), None);
        assert_eq!(
            spec.last_fire_within(&at(2024, 3, 10, 7, 30, 5), Duration::hours(1)),
            Some(at(2024, 3, 10, 7, 30, 0))
        );
    }
}
