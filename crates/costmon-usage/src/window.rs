//! Date ranges and scan windows.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::error::{Result, UsageError};

/// Inclusive calendar date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Build a range, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(UsageError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A single day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// `days` days ending on `end`, inclusive. `days == 0` is treated as one.
    pub fn last_days(end: NaiveDate, days: u32) -> Self {
        let back = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(back),
            end,
        }
    }

    /// Parse two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of days covered.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Every date in the range, in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(|d| *d <= self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| UsageError::InvalidDate(s.to_string()))
}

/// Which dates a log scan should pick up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeWindow {
    #[default]
    Today,
    Yesterday,
    /// `n` days ending today, inclusive
    LastDays(u32),
    Range(DateRange),
    /// Full history, no date filter
    All,
}

impl TimeWindow {
    /// Resolve against `today`. `None` means unbounded.
    pub fn resolve(&self, today: NaiveDate) -> Option<DateRange> {
        match self {
            Self::Today => Some(DateRange::day(today)),
            Self::Yesterday => Some(DateRange::day(today - Duration::days(1))),
            Self::LastDays(n) => Some(DateRange::last_days(today, *n)),
            Self::Range(range) => Some(*range),
            Self::All => None,
        }
    }

    /// Explicit range from two dates, validated.
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        Ok(Self::Range(DateRange::new(start, end)?))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Today => f.write_str("today"),
            Self::Yesterday => f.write_str("yesterday"),
            Self::LastDays(n) => write!(f, "last {n} days"),
            Self::Range(range) => write!(f, "{range}"),
            Self::All => f.write_str("all"),
        }
    }
}
