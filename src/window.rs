//! Reservation time windows.
//!
//! A window is a reservation date plus a start and end instant on the naive
//! local timeline. No timezone is attached: callers must not mix sources with
//! different offsets.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::MAX_TIME_TOKEN_LEN;
use crate::model::{Ms, Span};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Tokens at most this long are bare `HH:MM` times; longer ones are full timestamps.
const BARE_TIME_MAX_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("malformed {field} {value:?}: expected {expected}")]
    Malformed {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("end {end} must be after start {start}")]
    Inverted {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Normalized half-open window `[start, end)` on a reservation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    /// Parse a `YYYY-MM-DD` date and two tokens, each either `HH:MM` (taken on
    /// `date`) or a full `YYYY-MM-DD HH:MM` timestamp.
    pub fn parse(date: &str, start: &str, end: &str) -> Result<Self, WindowError> {
        let date = parse_date(date)?;
        let start = parse_token(date, "start", start)?;
        let end = parse_token(date, "end", end)?;
        Self::new(date, start, end)
    }

    pub fn new(date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, WindowError> {
        if end <= start {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { date, start, end })
    }

    pub fn span(&self) -> Span {
        Span::new(to_ms(self.start), to_ms(self.end))
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.span().overlaps(&other.span())
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, WindowError> {
    let trimmed = value.trim();
    check_len("date", trimmed, DATE_FORMAT)?;
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| malformed("date", trimmed, "YYYY-MM-DD"))
}

fn parse_token(date: NaiveDate, field: &'static str, value: &str) -> Result<NaiveDateTime, WindowError> {
    let trimmed = value.trim();
    check_len(field, trimmed, "HH:MM or YYYY-MM-DD HH:MM")?;
    if trimmed.len() <= BARE_TIME_MAX_LEN {
        NaiveTime::parse_from_str(trimmed, TIME_FORMAT)
            .map(|t| date.and_time(t))
            .map_err(|_| malformed(field, trimmed, "HH:MM"))
    } else {
        NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
            .map_err(|_| malformed(field, trimmed, "YYYY-MM-DD HH:MM"))
    }
}

fn check_len(field: &'static str, value: &str, expected: &'static str) -> Result<(), WindowError> {
    if value.len() > MAX_TIME_TOKEN_LEN {
        let mut cut = MAX_TIME_TOKEN_LEN;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        return Err(malformed(field, &value[..cut], expected));
    }
    Ok(())
}

fn malformed(field: &'static str, value: &str, expected: &'static str) -> WindowError {
    WindowError::Malformed {
        field,
        value: value.to_string(),
        expected,
    }
}

fn to_ms(t: NaiveDateTime) -> Ms {
    t.and_utc().timestamp_millis()
}
