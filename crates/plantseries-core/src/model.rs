//! Shared data model: partition keys, calendar months, rows, and time
//! ranges.
//!
//! Everything downstream of the parser speaks in terms of [`Row`]: a
//! timestamp plus a mapping of parameter name to nullable numeric value.
//! Null is deliberately distinct from zero and from "column absent" —
//! the coordinate transformer relies on that distinction to break chart
//! lines at gaps instead of interpolating across them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// A calendar month, the granularity at which partitions are cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
}

/// Error parsing a `YYYY-MM` string into a [`YearMonth`].
#[derive(Debug, Snafu)]
#[snafu(display("Invalid year-month {input:?} (expected YYYY-MM)"))]
pub struct ParseYearMonthError {
    /// The rejected input.
    pub input: String,
}

impl YearMonth {
    /// The month containing `ts`.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// First instant of this month (UTC midnight on the 1st).
    pub fn start(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }

    /// First instant of the following month (exclusive upper bound).
    pub fn end(&self) -> DateTime<Utc> {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = ParseYearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseYearMonthError {
            input: s.to_string(),
        };
        let (y, m) = s.split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

/// Identifies one partition: the rows of one machine for one month.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    /// Plant identifier.
    pub plant: String,
    /// Machine identifier within the plant.
    pub machine: String,
    /// Calendar month covered by the partition.
    pub month: YearMonth,
}

impl PartitionKey {
    /// Build a key from owned or borrowed parts.
    pub fn new(plant: impl Into<String>, machine: impl Into<String>, month: YearMonth) -> Self {
        Self {
            plant: plant.into(),
            machine: machine.into(),
            month,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.plant, self.machine, self.month)
    }
}

/// One stored observation: a timestamp plus nullable numeric values per
/// parameter.
///
/// Invariant: `values` carries an entry for every parameter of the table
/// the row belongs to, so column alignment survives rows with missing
/// cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Observation instant.
    pub timestamp: DateTime<Utc>,
    /// Parameter name to value; `None` marks a gap, never zero.
    pub values: BTreeMap<String, Option<f64>>,
}

impl Row {
    /// Row with a timestamp and no parameters.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }
}

/// Half-open time window `[start, end)` used by queries and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range; callers are expected to pass `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Whether the window intersects the closed interval `[min, max]`.
    pub fn intersects(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> bool {
        max >= self.start && min < self.end
    }

    /// Whether any instant of `month` can fall inside the window.
    ///
    /// Partition discovery filters file names on this before reading any
    /// data, so a partition outside its declared bounds is never opened.
    pub fn covers_month(&self, month: YearMonth) -> bool {
        month.end() > self.start && month.start() < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC 3339 timestamp")
    }

    #[test]
    fn year_month_round_trips_through_display() {
        let ym = YearMonth {
            year: 2024,
            month: 3,
        };
        assert_eq!(ym.to_string(), "2024-03");
        assert_eq!("2024-03".parse::<YearMonth>().unwrap(), ym);
    }

    #[test]
    fn year_month_rejects_bad_input() {
        for bad in ["2024", "2024-13", "2024-00", "24-03", "2024-3", "abcd-ef"] {
            assert!(bad.parse::<YearMonth>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn year_month_bounds_wrap_december() {
        let dec = YearMonth {
            year: 2023,
            month: 12,
        };
        assert_eq!(dec.start(), ts("2023-12-01T00:00:00Z"));
        assert_eq!(dec.end(), ts("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn year_month_from_timestamp() {
        let ym = YearMonth::from_timestamp(ts("2024-06-15T12:30:00Z"));
        assert_eq!(
            ym,
            YearMonth {
                year: 2024,
                month: 6
            }
        );
    }

    #[test]
    fn time_range_is_half_open() {
        let range = TimeRange::new(ts("2024-01-01T00:00:00Z"), ts("2024-01-02T00:00:00Z"));
        assert!(range.contains(ts("2024-01-01T00:00:00Z")));
        assert!(range.contains(ts("2024-01-01T23:59:59Z")));
        assert!(!range.contains(ts("2024-01-02T00:00:00Z")));
    }

    #[test]
    fn time_range_month_pruning() {
        let range = TimeRange::new(ts("2024-01-20T00:00:00Z"), ts("2024-02-10T00:00:00Z"));
        assert!(range.covers_month("2024-01".parse().unwrap()));
        assert!(range.covers_month("2024-02".parse().unwrap()));
        assert!(!range.covers_month("2023-12".parse().unwrap()));
        assert!(!range.covers_month("2024-03".parse().unwrap()));
    }
}
