//! Structural classification of raw CSV payloads.
//!
//! Detection runs before any row parsing and inspects only the first few
//! records. It never looks at file names: the three supported layouts
//! are distinguished purely by the shape of their leading rows.
//!
//! - [`TableFormat::LegacyMultiRow`]: a numeric identifier row with an
//!   empty leading cell, then a parameter-name row, then a unit row,
//!   then data.
//! - [`TableFormat::SplitHeader`]: a blank top-left cell and a numeric
//!   second cell, with header text spread over the first two records and
//!   data from the third.
//! - [`TableFormat::Standard`]: one header record, data from the second.
//!
//! The classifier is deterministic: layouts are tried in the order
//! above, and the first whose structural conditions hold wins.

use csv::StringRecord;

use crate::ingest::timestamp::parse_timestamp;

/// Closed set of supported tabular layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Single header record followed by data records.
    Standard,
    /// Header text split over the first two records.
    SplitHeader,
    /// Identifier row, name row, unit row, then data records.
    LegacyMultiRow,
}

impl TableFormat {
    /// Index of the first data record for this layout.
    pub fn data_start(self) -> usize {
        match self {
            TableFormat::Standard => 1,
            TableFormat::SplitHeader => 2,
            TableFormat::LegacyMultiRow => 3,
        }
    }
}

/// Trimmed cell `i` of a record, empty when absent.
pub(crate) fn cell(record: &StringRecord, i: usize) -> &str {
    record.get(i).map(str::trim).unwrap_or("")
}

pub(crate) fn is_number(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false)
}

fn looks_like_id_row(record: &StringRecord) -> bool {
    if !cell(record, 0).is_empty() || record.len() < 2 {
        return false;
    }
    let mut saw_id = false;
    for i in 1..record.len() {
        let c = cell(record, i);
        if c.is_empty() {
            continue;
        }
        if !is_number(c) {
            return false;
        }
        saw_id = true;
    }
    saw_id
}

fn looks_like_unit_row(record: &StringRecord) -> bool {
    // Units ("°C", "MPa", "rpm") never parse as numbers; a row of values
    // would.
    (1..record.len()).all(|i| {
        let c = cell(record, i);
        c.is_empty() || !is_number(c)
    })
}

fn starts_with_timestamp(record: &StringRecord) -> bool {
    parse_timestamp(cell(record, 0)).is_some()
}

/// Classify a payload from its leading records.
///
/// Returns `None` when no supported layout matches (for example an empty
/// payload, or one whose first record is already data).
pub fn detect(records: &[StringRecord]) -> Option<TableFormat> {
    if records.is_empty() {
        return None;
    }

    if records.len() >= 4
        && looks_like_id_row(&records[0])
        && !cell(&records[1], 1).is_empty()
        && looks_like_unit_row(&records[2])
        && starts_with_timestamp(&records[3])
    {
        return Some(TableFormat::LegacyMultiRow);
    }

    if records.len() >= 3
        && cell(&records[0], 0).is_empty()
        && is_number(cell(&records[0], 1))
        && starts_with_timestamp(&records[2])
    {
        return Some(TableFormat::SplitHeader);
    }

    let header = &records[0];
    let has_header_text = (0..header.len()).any(|i| !cell(header, i).is_empty());
    if has_header_text && !starts_with_timestamp(header) {
        return Some(TableFormat::Standard);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(lines: &[&[&str]]) -> Vec<StringRecord> {
        lines
            .iter()
            .map(|cells| StringRecord::from(cells.to_vec()))
            .collect()
    }

    #[test]
    fn detects_standard_layout() {
        let recs = records(&[
            &["timestamp", "temp", "pressure"],
            &["2024-03-01 00:00:00", "1.0", "2.0"],
        ]);
        assert_eq!(detect(&recs), Some(TableFormat::Standard));
    }

    #[test]
    fn detects_split_header_layout() {
        let recs = records(&[
            &["", "1", "2"],
            &["", "temp", "pressure"],
            &["2024-03-01 00:00:00", "1.0", "2.0"],
        ]);
        assert_eq!(detect(&recs), Some(TableFormat::SplitHeader));
    }

    #[test]
    fn detects_legacy_multi_row_layout() {
        let recs = records(&[
            &["", "101", "102"],
            &["", "temp", "pressure"],
            &["", "°C", "MPa"],
            &["2024-03-01 00:00:00", "1.0", "2.0"],
        ]);
        assert_eq!(detect(&recs), Some(TableFormat::LegacyMultiRow));
    }

    #[test]
    fn legacy_takes_precedence_over_split() {
        // A legacy file also has a blank top-left cell and a numeric
        // second cell; the unit row disambiguates.
        let recs = records(&[
            &["", "1", "2"],
            &["", "a", "b"],
            &["", "kW", "kW"],
            &["2024-03-01 00:00:00", "1", "2"],
        ]);
        assert_eq!(detect(&recs), Some(TableFormat::LegacyMultiRow));
    }

    #[test]
    fn headerless_data_is_unrecognized() {
        let recs = records(&[&["2024-03-01 00:00:00", "1.0"]]);
        assert_eq!(detect(&recs), None);
    }

    #[test]
    fn empty_payload_is_unrecognized() {
        assert_eq!(detect(&[]), None);
    }

    #[test]
    fn value_third_row_rules_out_legacy() {
        // Third record holds numbers, so it cannot be a unit row; the
        // payload falls through to the split-header rule.
        let recs = records(&[
            &["", "1", "2"],
            &["", "temp", "pressure"],
            &["2024-03-01 00:00:00", "3.5", "4.5"],
            &["2024-03-01 00:01:00", "3.6", "4.6"],
        ]);
        assert_eq!(detect(&recs), Some(TableFormat::SplitHeader));
    }
}
