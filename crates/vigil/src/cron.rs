//! Cron expression parsing and next-occurrence computation.
//!
//! Supports the classic five-field form `minute hour day-of-month month
//! day-of-week` and a six-field form with a leading `second`. All times are
//! UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

/// How far ahead `next_after` searches before giving up
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression is empty")]
    Empty,

    #[error("expected 5 or 6 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown cron macro '{0}'")]
    UnknownMacro(String),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("{field} value {value} is outside {min}..={max}")]
    OutOfRange { field: &'static str, value: u32, min: u32, max: u32 },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of `names[0]`
    names_base: u32,
    allows_any: bool,
}

const SECOND: FieldSpec =
    FieldSpec { name: "second", min: 0, max: 59, names: &[], names_base: 0, allows_any: false };
const MINUTE: FieldSpec =
    FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0, allows_any: false };
const HOUR: FieldSpec =
    FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0, allows_any: false };
const DAY_OF_MONTH: FieldSpec =
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0, allows_any: true };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"],
    names_base: 1,
    allows_any: false,
};
// 7 is accepted as an alias for Sunday
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    names_base: 0,
    allows_any: true,
};

/// Set of allowed values for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// False when the field was written as `*` or `?`
    restricted: bool,
}

impl Field {
    fn single(value: u32) -> Self {
        Self { bits: 1 << value, restricted: true }
    }

    fn contains(&self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }
}

/// Parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: Field,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let source = expression.trim();
        if source.is_empty() {
            return Err(CronError::Empty);
        }

        let expanded = if source.starts_with('@') { expand_macro(source)? } else { source };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let (seconds, rest) = match fields.len() {
            5 => (Field::single(0), &fields[..]),
            6 => (parse_field(fields[0], SECOND)?, &fields[1..]),
            n => return Err(CronError::FieldCount(n)),
        };

        Ok(Self {
            source: source.to_string(),
            seconds,
            minutes: parse_field(rest[0], MINUTE)?,
            hours: parse_field(rest[1], HOUR)?,
            days_of_month: parse_field(rest[2], DAY_OF_MONTH)?,
            months: parse_field(rest[3], MONTH)?,
            days_of_week: parse_field(rest[4], DAY_OF_WEEK)?,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Earliest matching instant strictly after `after`.
    ///
    /// Returns `None` when nothing matches within the search horizon, e.g.
    /// `0 0 30 2 *`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let last_year = t.year() + SEARCH_YEARS;

        while t.year() <= last_year {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(t)?;
            } else if !self.day_matches(t.date()) {
                t = start_of_day(t.date().succ_opt()?)?;
            } else if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
            } else if !self.minutes.contains(t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
            } else if !self.seconds.contains(t.second()) {
                t += Duration::seconds(1);
            } else {
                return Some(t.and_utc());
            }
        }
        None
    }

    /// Day-of-month and day-of-week combine with OR when both are
    /// restricted, AND otherwise.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn expand_macro(source: &str) -> Result<&'static str, CronError> {
    match source.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownMacro(source.to_string())),
    }
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<Field, CronError> {
    let invalid = || CronError::InvalidField { field: spec.name, value: raw.to_string() };

    let is_day_of_week = spec.name == DAY_OF_WEEK.name;
    let wildcard_end = if is_day_of_week { 6 } else { spec.max };

    let mut bits = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = match range {
            "*" => (spec.min, wildcard_end),
            "?" if spec.allows_any => (spec.min, wildcard_end),
            "" | "?" => return Err(invalid()),
            _ => match range.split_once('-') {
                Some((low, high)) => (parse_value(low, spec, raw)?, parse_value(high, spec, raw)?),
                None => {
                    let value = parse_value(range, spec, raw)?;
                    (value, if step.is_some() { spec.max } else { value })
                }
            },
        };
        if start > end {
            return Err(invalid());
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            // Sunday written as 7
            let value = if is_day_of_week && value == 7 { 0 } else { value };
            bits |= 1 << value;
        }
    }

    let restricted = !(raw.starts_with('*') || raw.starts_with('?'));
    Ok(Field { bits, restricted })
}

fn parse_value(token: &str, spec: FieldSpec, raw: &str) -> Result<u32, CronError> {
    let value = if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
        token
            .parse::<u32>()
            .map_err(|_| CronError::InvalidField { field: spec.name, value: raw.to_string() })?
    } else {
        let index = spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .ok_or_else(|| CronError::InvalidField { field: spec.name, value: raw.to_string() })?;
        index as u32 + spec.names_base
    };

    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange { field: spec.name, value, min: spec.min, max: spec.max });
    }
    Ok(value)
}

fn start_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
    start_of_day(NaiveDate::from_ymd_opt(year, month, 1)?)
}
