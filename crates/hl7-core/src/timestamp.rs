//! HL7 timestamp decoding.
//!
//! HL7 v2.5 carries timestamps as bare digit strings of varying precision:
//! `YYYYMMDD`, `YYYYMMDDHH`, `YYYYMMDDHHMM`, or `YYYYMMDDHHMMSS`. Missing
//! trailing components default to zero. The same decoder serves both `PID-7`
//! (date of birth) and `OBR-7` (observation time).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A second-resolution civil timestamp.
///
/// Field order matters: the derived `Ord` compares year first and second
/// last, which matches chronological order.
#[derive(Debug, Eq, Ord, PartialOrd, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct Hl7Timestamp {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("invalid timestamp length {0}")]
    InvalidLength(usize),
    #[error("non-numeric timestamp: {0:?}")]
    NotNumeric(String),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u16 },
}

impl Hl7Timestamp {
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Hl7Timestamp, TimestampError> {
        let ts = Hl7Timestamp {
            year,
            month,
            day,
            hour,
            minute,
            second,
        };
        ts.validate()?;
        Ok(ts)
    }

    /// Decode an HL7 timestamp field.
    ///
    /// Returns `Ok(None)` for the empty string (field present but unvalued);
    /// any length other than 8/10/12/14 is an error.
    pub fn parse(field: &str) -> Result<Option<Hl7Timestamp>, TimestampError> {
        if field.is_empty() {
            return Ok(None);
        }
        if !matches!(field.len(), 8 | 10 | 12 | 14) {
            return Err(TimestampError::InvalidLength(field.len()));
        }
        if !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::NotNumeric(field.to_owned()));
        }

        let digits = |range: std::ops::Range<usize>| -> u16 {
            // Safe: all-digit ASCII checked above, and 4 digits fit in u16.
            field[range].parse::<u16>().unwrap_or(0)
        };

        let year = digits(0..4);
        let month = digits(4..6) as u8;
        let day = digits(6..8) as u8;
        let hour = if field.len() >= 10 { digits(8..10) as u8 } else { 0 };
        let minute = if field.len() >= 12 { digits(10..12) as u8 } else { 0 };
        let second = if field.len() >= 14 { digits(12..14) as u8 } else { 0 };

        Hl7Timestamp::new(year, month, day, hour, minute, second).map(Some)
    }

    /// Decode an ISO-style date from the history CSV: `YYYY-MM-DD` with an
    /// optional ` HH:MM:SS` (or `T`-separated) time part.
    pub fn parse_iso(s: &str) -> Result<Hl7Timestamp, TimestampError> {
        let s = s.trim();
        let (date, time) = match s.split_once([' ', 'T']) {
            Some((d, t)) => (d, Some(t)),
            None => (s, None),
        };
        let mut compact = String::with_capacity(14);
        for part in date.split('-') {
            compact.push_str(part);
        }
        if compact.len() != 8 {
            return Err(TimestampError::NotNumeric(s.to_owned()));
        }
        if let Some(time) = time {
            for part in time.split(':') {
                compact.push_str(part);
            }
            if compact.len() != 14 {
                return Err(TimestampError::NotNumeric(s.to_owned()));
            }
        }
        Hl7Timestamp::parse(&compact)?.ok_or(TimestampError::InvalidLength(0))
    }

    /// Render as the 14-digit `YYYYMMDDHHMMSS` form.
    ///
    /// Shorter inputs re-encode with their missing components as zeros, so
    /// `parse` then `compact` round-trips exactly for 14-digit inputs.
    pub fn compact(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// Days since the civil epoch 1970-01-01 (negative before it).
    ///
    /// Standard Gregorian era arithmetic; only differences are meaningful to
    /// callers (the feature extractor's age computation).
    pub fn days_from_civil(&self) -> i64 {
        let y = i64::from(self.year) - i64::from(self.month <= 2);
        let m = i64::from(self.month);
        let d = i64::from(self.day);
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = y - era * 400;
        let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        era * 146097 + doe - 719468
    }

    fn validate(&self) -> Result<(), TimestampError> {
        if self.month == 0 || self.month > 12 {
            return Err(TimestampError::OutOfRange {
                field: "month",
                value: u16::from(self.month),
            });
        }
        if self.day == 0 || self.day > 31 {
            return Err(TimestampError::OutOfRange {
                field: "day",
                value: u16::from(self.day),
            });
        }
        if self.hour > 23 {
            return Err(TimestampError::OutOfRange {
                field: "hour",
                value: u16::from(self.hour),
            });
        }
        if self.minute > 59 {
            return Err(TimestampError::OutOfRange {
                field: "minute",
                value: u16::from(self.minute),
            });
        }
        if self.second > 59 {
            return Err(TimestampError::OutOfRange {
                field: "second",
                value: u16::from(self.second),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Hl7Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
