//! Timestamp and calendar utilities
//!
//! Scheduled items carry a calendar day plus "HH:MM" strings in the ensemble's
//! local time. "Today" is always the local calendar day.

use chrono::{
    Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday,
};

use crate::{Error, Result};

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now_local(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now_local().date()
    }
}

/// Clock backed by the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock frozen at a given local time
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    pub fn at_day(day: NaiveDate) -> Self {
        Self(day.and_time(NaiveTime::MIN))
    }
}

impl Clock for FixedClock {
    fn now_local(&self) -> NaiveDateTime {
        self.0
    }
}

/// One local calendar day as a half-open range `[start, end_exclusive)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: NaiveDate,
    pub end_exclusive: NaiveDate,
}

impl DayWindow {
    pub fn for_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            end_exclusive: day + ChronoDuration::days(1),
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.start.weekday()
    }

    /// Weekday index, Sunday = 0
    pub fn weekday_index(&self) -> u32 {
        self.start.weekday().num_days_from_sunday()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day < self.end_exclusive
    }
}

/// Parse a "HH:MM" time of day
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        Error::InvalidInput(format!("Invalid time '{}' (expected HH:MM): {}", value, e))
    })
}

/// Parse an ISO calendar date ("YYYY-MM-DD")
pub fn parse_calendar_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        Error::InvalidInput(format!("Invalid date '{}' (expected YYYY-MM-DD): {}", value, e))
    })
}

/// Format a calendar day as dd/mm/yyyy
pub fn format_calendar_date(day: NaiveDate) -> String {
    day.format("%d/%m/%Y").to_string()
}
