use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::errors::InputError;

/// Target resampling granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    /// Fixed-width bins, width in seconds.
    Fixed(i64),
    Day,
    Month,
    Year,
}

impl Interval {
    pub const HOURLY: Interval = Interval::Fixed(3600);

    /// Parses specifiers such as `H`, `1h`, `30min`, `30T`, `15s`, `D`, `M`, `A`.
    pub fn parse(text: &str) -> Result<Interval, InputError> {
        let trimmed = text.trim();
        let re = Regex::new(r"^(\d*)\s*([A-Za-z]+)$")
            .map_err(|_| InputError::InvalidInterval(text.to_string()))?;
        let caps = re
            .captures(trimmed)
            .ok_or_else(|| InputError::InvalidInterval(text.to_string()))?;

        let count: i64 = match caps.get(1).map(|m| m.as_str()).unwrap_or("") {
            "" => 1,
            digits => digits
                .parse()
                .map_err(|_| InputError::InvalidInterval(text.to_string()))?,
        };
        if count <= 0 {
            return Err(InputError::InvalidInterval(text.to_string()));
        }
        let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        let interval = match suffix {
            "s" | "S" => Interval::Fixed(count),
            "min" | "T" => Interval::Fixed(count * 60),
            "h" | "H" => Interval::Fixed(count * 3600),
            "D" | "d" if count == 1 => Interval::Day,
            "D" | "d" => Interval::Fixed(count * 86_400),
            "M" if count == 1 => Interval::Month,
            "A" | "Y" if count == 1 => Interval::Year,
            _ => return Err(InputError::InvalidInterval(text.to_string())),
        };
        Ok(interval)
    }

    /// Directory token used in the reduced-table layout.
    pub fn dir_name(&self) -> String {
        match *self {
            Interval::Fixed(3600) => "H".to_string(),
            Interval::Fixed(secs) if secs % 3600 == 0 => format!("{}H", secs / 3600),
            Interval::Fixed(secs) if secs % 60 == 0 => format!("{}T", secs / 60),
            Interval::Fixed(secs) => format!("{secs}S"),
            Interval::Day => "D".to_string(),
            Interval::Month => "M".to_string(),
            Interval::Year => "A".to_string(),
        }
    }

    pub fn is_calendar(&self) -> bool {
        !matches!(self, Interval::Fixed(_))
    }

    /// Label of the bin containing `dt`.
    ///
    /// Fixed and daily bins are labelled by their left edge. Monthly and
    /// annual bins are labelled by the last day of the period at midnight.
    pub fn bin_label(&self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Interval::Fixed(secs) => {
                let ts = dt.and_utc().timestamp();
                let offset = Duration::seconds(ts.rem_euclid(secs))
                    + Duration::nanoseconds(i64::from(dt.nanosecond()));
                Some(dt - offset)
            }
            Interval::Day => dt.date().and_hms_opt(0, 0, 0),
            Interval::Month => month_end(dt.year(), dt.month())?.and_hms_opt(0, 0, 0),
            Interval::Year => NaiveDate::from_ymd_opt(dt.year(), 12, 31)?.and_hms_opt(0, 0, 0),
        }
    }

    /// Label of the bin that follows the bin labelled `label`.
    pub fn next_label(&self, label: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Interval::Fixed(secs) => Some(label + Duration::seconds(secs)),
            Interval::Day => Some(label + Duration::days(1)),
            Interval::Month => {
                let (y, m) = if label.month() == 12 {
                    (label.year() + 1, 1)
                } else {
                    (label.year(), label.month() + 1)
                };
                month_end(y, m)?.and_hms_opt(0, 0, 0)
            }
            Interval::Year => NaiveDate::from_ymd_opt(label.year() + 1, 12, 31)?.and_hms_opt(0, 0, 0),
        }
    }

    /// Wall-clock length in hours of the bin labelled `label`.
    pub fn span_hours(&self, label: NaiveDateTime) -> f64 {
        match *self {
            Interval::Fixed(secs) => secs as f64 / 3600.0,
            Interval::Day => 24.0,
            Interval::Month => f64::from(days_in_month(label.year(), label.month())) * 24.0,
            Interval::Year => {
                let days = if is_leap_year(label.year()) { 366.0 } else { 365.0 };
                days * 24.0
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

impl FromStr for Interval {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        _ => 28,
    }
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
}
