//! Row parser: raw CSV text to a canonical [`ParsedTable`].
//!
//! Parsing is a two-step pipeline: the payload is tokenized with the
//! `csv` crate (quoted fields, embedded commas, and doubled-quote
//! escaping come for free), then classified by
//! [`crate::ingest::format::detect`] before any data row is touched.
//!
//! Malformed data rows are collected as [`RowIssue`]s and skipped; the
//! parse as a whole fails only when no rows survive. Large payloads
//! report progress every N rows via [`parse_with_progress`] so callers
//! can drive a progress bar without blocking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use snafu::prelude::*;

use crate::ingest::format::{self, TableFormat, cell};
use crate::ingest::timestamp::parse_timestamp;
use crate::model::Row;

/// An unparsed file: its name (for error reporting) and raw text.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// Source file name.
    pub name: String,
    /// Raw text contents.
    pub content: String,
}

impl RawPayload {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// One parsed cell.
///
/// Text and null are kept distinct from numbers on purpose: a cell that
/// fails numeric coercion keeps its literal text (never silently
/// zeroed), and an empty cell is null rather than zero so gap handling
/// downstream can tell the difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A finite numeric value.
    Number(f64),
    /// Literal text that did not coerce to a number.
    Text(String),
    /// An empty cell.
    Null,
}

impl Cell {
    /// Numeric view of the cell; text and null are both `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            Cell::Text(_) | Cell::Null => None,
        }
    }

    fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            _ => Cell::Text(trimmed.to_string()),
        }
    }
}

/// One malformed data row, recorded and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowIssue {
    /// Zero-based record index within the payload.
    pub row_index: usize,
    /// Human-readable reason the row was skipped.
    pub reason: String,
}

/// One parsed data row; `cells` aligns with
/// [`ParsedTable::parameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// Row timestamp (always present and parseable).
    pub timestamp: DateTime<Utc>,
    /// Parameter cells, in parameter order.
    pub cells: Vec<Cell>,
}

/// Canonical tabular form of one payload.
///
/// Invariant: `headers[0]` names the timestamp column and every row's
/// `cells` has exactly `headers.len() - 1` entries, so column alignment
/// is preserved even for rows with trailing cells missing.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    /// Source file name the table came from.
    pub source: String,
    /// Layout the classifier assigned.
    pub format: TableFormat,
    /// Ordered column headers; index 0 is the timestamp column.
    pub headers: Vec<String>,
    /// Unit strings per parameter, when the layout carries a unit row.
    pub units: BTreeMap<String, String>,
    /// Surviving data rows, in payload order.
    pub rows: Vec<ParsedRow>,
    /// Malformed rows that were skipped.
    pub issues: Vec<RowIssue>,
}

impl ParsedTable {
    /// Parameter names, i.e. every header except the timestamp column.
    pub fn parameters(&self) -> &[String] {
        &self.headers[1..]
    }

    /// Closed time bounds of the surviving rows, `None` when empty.
    ///
    /// Rows are assumed chronological but not required to be; bounds are
    /// computed, not taken from the first/last row.
    pub fn time_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut iter = self.rows.iter().map(|r| r.timestamp);
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
        Some((min, max))
    }

    /// Convert to storage rows: text cells become null, and every row
    /// carries an entry for every parameter.
    pub fn to_rows(&self) -> Vec<Row> {
        let params = self.parameters();
        self.rows
            .iter()
            .map(|row| Row {
                timestamp: row.timestamp,
                values: params
                    .iter()
                    .zip(row.cells.iter())
                    .map(|(p, c)| (p.clone(), c.as_number()))
                    .collect(),
            })
            .collect()
    }
}

/// Errors from parsing one payload.
#[derive(Debug, Snafu)]
pub enum ParseError {
    /// CSV tokenization failed outright (for example invalid UTF-8 in a
    /// quoted field).
    #[snafu(display("Cannot tokenize {source_name}: {source}"))]
    Tokenize {
        /// File the payload came from.
        source_name: String,
        /// Underlying CSV reader error.
        source: csv::Error,
    },

    /// No supported layout matched the payload's leading records.
    #[snafu(display("No supported table layout recognized in {source_name}"))]
    Unrecognized {
        /// File the payload came from.
        source_name: String,
    },

    /// Every data row was malformed (or there were none).
    #[snafu(display("No rows survived parsing {source_name} ({} malformed)", issues.len()))]
    NoRows {
        /// File the payload came from.
        source_name: String,
        /// The recorded per-row failures.
        issues: Vec<RowIssue>,
    },
}

fn tokenize(payload: &RawPayload) -> Result<Vec<StringRecord>, ParseError> {
    // The csv reader also strips a UTF-8 BOM, but payloads arrive as
    // strings here, so strip it before the bytes ever reach the reader.
    let content = payload.content.strip_prefix('\u{feff}').unwrap_or(&payload.content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.context(TokenizeSnafu {
            source_name: payload.name.clone(),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn synthesize_header(i: usize, name: &str) -> String {
    if !name.is_empty() {
        name.to_string()
    } else if i == 0 {
        // Load-bearing: downstream joins key on this exact name.
        "timestamp".to_string()
    } else {
        format!("column_{i}")
    }
}

fn standard_headers(records: &[StringRecord]) -> Vec<String> {
    let header = &records[0];
    (0..header.len())
        .map(|i| synthesize_header(i, cell(header, i)))
        .collect()
}

fn split_headers(records: &[StringRecord]) -> Vec<String> {
    let (top, bottom) = (&records[0], &records[1]);
    let width = top.len().max(bottom.len());
    (0..width)
        .map(|i| {
            // The bottom record carries the human-readable names; the
            // top is a channel-number row used only when the bottom cell
            // is blank.
            let name = match cell(bottom, i) {
                "" => cell(top, i),
                named => named,
            };
            synthesize_header(i, name)
        })
        .collect()
}

fn legacy_headers(records: &[StringRecord]) -> (Vec<String>, BTreeMap<String, String>) {
    let names = &records[1];
    let unit_row = &records[2];
    let headers: Vec<String> = (0..names.len())
        .map(|i| synthesize_header(i, cell(names, i)))
        .collect();

    let mut units = BTreeMap::new();
    for (i, header) in headers.iter().enumerate().skip(1) {
        let unit = cell(unit_row, i);
        if !unit.is_empty() {
            units.insert(header.clone(), unit.to_string());
        }
    }
    (headers, units)
}

/// Parse one payload without progress reporting.
pub fn parse(payload: &RawPayload) -> Result<ParsedTable, ParseError> {
    parse_with_progress(payload, usize::MAX, |_| {})
}

/// Parse one payload, invoking `on_rows(total_parsed)` every
/// `progress_rows` surviving rows.
pub fn parse_with_progress(
    payload: &RawPayload,
    progress_rows: usize,
    mut on_rows: impl FnMut(usize),
) -> Result<ParsedTable, ParseError> {
    let records = tokenize(payload)?;
    let format = format::detect(&records).context(UnrecognizedSnafu {
        source_name: payload.name.clone(),
    })?;

    let (headers, units) = match format {
        TableFormat::Standard => (standard_headers(&records), BTreeMap::new()),
        TableFormat::SplitHeader => (split_headers(&records), BTreeMap::new()),
        TableFormat::LegacyMultiRow => legacy_headers(&records),
    };
    let width = headers.len();

    let mut rows = Vec::new();
    let mut issues = Vec::new();
    let progress_rows = progress_rows.max(1);

    for (index, record) in records.iter().enumerate().skip(format.data_start()) {
        let raw_ts = cell(record, 0);
        let Some(timestamp) = parse_timestamp(raw_ts) else {
            issues.push(RowIssue {
                row_index: index,
                reason: if raw_ts.is_empty() {
                    "missing timestamp".to_string()
                } else {
                    format!("unparseable timestamp {raw_ts:?}")
                },
            });
            continue;
        };

        let cells = (1..width)
            .map(|i| Cell::coerce(record.get(i).unwrap_or("")))
            .collect();
        rows.push(ParsedRow { timestamp, cells });

        if rows.len() % progress_rows == 0 {
            on_rows(rows.len());
        }
    }

    if rows.is_empty() {
        return NoRowsSnafu {
            source_name: payload.name.clone(),
            issues,
        }
        .fail();
    }

    log::debug!(
        "parsed {} as {:?}: {} rows, {} parameters, {} issues",
        payload.name,
        format,
        rows.len(),
        width.saturating_sub(1),
        issues.len()
    );

    Ok(ParsedTable {
        source: payload.name.clone(),
        format,
        headers,
        units,
        rows,
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(content: &str) -> RawPayload {
        RawPayload::new("test.csv", content)
    }

    #[test]
    fn parses_standard_csv() {
        let table = parse(&payload(
            "timestamp,temp,pressure\n\
             2024-03-01 00:00:00,1.5,2.5\n\
             2024-03-01 00:01:00,1.6,2.6\n",
        ))
        .expect("parses");

        assert_eq!(table.format, TableFormat::Standard);
        assert_eq!(table.headers, vec!["timestamp", "temp", "pressure"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells[0], Cell::Number(1.5));
        assert!(table.issues.is_empty());
    }

    #[test]
    fn empty_timestamp_header_is_synthesized() {
        let table = parse(&payload(
            ",temp\n\
             2024-03-01 00:00:00,1.5\n",
        ))
        .expect("parses");
        assert_eq!(table.headers[0], "timestamp");
    }

    #[test]
    fn strips_byte_order_mark() {
        let table = parse(&payload(
            "\u{feff}timestamp,temp\n2024-03-01 00:00:00,1.5\n",
        ))
        .expect("parses");
        assert_eq!(table.headers[0], "timestamp");
    }

    #[test]
    fn handles_quoted_fields_with_commas_and_escapes() {
        let table = parse(&payload(
            "timestamp,\"flow, total\",\"say \"\"hi\"\"\"\n\
             2024-03-01 00:00:00,3.5,abc\n",
        ))
        .expect("parses");
        assert_eq!(table.headers[1], "flow, total");
        assert_eq!(table.headers[2], "say \"hi\"");
        assert_eq!(table.rows[0].cells[1], Cell::Text("abc".to_string()));
    }

    #[test]
    fn empty_cells_are_null_not_zero() {
        let table = parse(&payload(
            "timestamp,a,b\n\
             2024-03-01 00:00:00,,0\n",
        ))
        .expect("parses");
        assert_eq!(table.rows[0].cells[0], Cell::Null);
        assert_eq!(table.rows[0].cells[1], Cell::Number(0.0));
    }

    #[test]
    fn non_numeric_cells_keep_their_text() {
        let table = parse(&payload(
            "timestamp,a\n\
             2024-03-01 00:00:00,OFF\n",
        ))
        .expect("parses");
        assert_eq!(table.rows[0].cells[0], Cell::Text("OFF".to_string()));
        assert_eq!(table.rows[0].cells[0].as_number(), None);
    }

    #[test]
    fn short_rows_keep_column_alignment() {
        let table = parse(&payload(
            "timestamp,a,b\n\
             2024-03-01 00:00:00,1.0\n",
        ))
        .expect("parses");
        assert_eq!(table.rows[0].cells.len(), 2);
        assert_eq!(table.rows[0].cells[1], Cell::Null);
    }

    #[test]
    fn malformed_rows_are_recorded_and_skipped() {
        let table = parse(&payload(
            "timestamp,a\n\
             2024-03-01 00:00:00,1.0\n\
             not-a-time,2.0\n\
             2024-03-01 00:02:00,3.0\n",
        ))
        .expect("parses");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.issues.len(), 1);
        assert_eq!(table.issues[0].row_index, 2);
    }

    #[test]
    fn fails_only_when_zero_rows_survive() {
        let err = parse(&payload("timestamp,a\nbad,1\nworse,2\n")).expect_err("no rows");
        match err {
            ParseError::NoRows { issues, .. } => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_payload_errors() {
        let err = parse(&payload("")).expect_err("unrecognized");
        assert!(matches!(err, ParseError::Unrecognized { .. }));
    }

    #[test]
    fn parses_split_header_layout() {
        let table = parse(&payload(
            ",1,2\n\
             ,temp,\n\
             2024-03-01 00:00:00,1.0,2.0\n",
        ))
        .expect("parses");
        assert_eq!(table.format, TableFormat::SplitHeader);
        // Bottom name preferred; blank bottom falls back to the channel
        // number from the top record.
        assert_eq!(table.headers, vec!["timestamp", "temp", "2"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn parses_legacy_multi_row_layout_with_units() {
        let table = parse(&payload(
            ",101,102\n\
             ,temp,pressure\n\
             ,°C,MPa\n\
             2024-03-01 00:00:00,25.0,1.2\n\
             2024-03-01 00:01:00,25.1,1.3\n",
        ))
        .expect("parses");
        assert_eq!(table.format, TableFormat::LegacyMultiRow);
        assert_eq!(table.headers, vec!["timestamp", "temp", "pressure"]);
        assert_eq!(table.units.get("temp").map(String::as_str), Some("°C"));
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn progress_callback_fires_on_row_boundaries() {
        let mut content = String::from("timestamp,a\n");
        for minute in 0..25 {
            content.push_str(&format!("2024-03-01 00:{minute:02}:00,1.0\n"));
        }
        let mut seen = Vec::new();
        parse_with_progress(&payload(&content), 10, |n| seen.push(n)).expect("parses");
        assert_eq!(seen, vec![10, 20]);
    }

    #[test]
    fn to_rows_maps_text_to_null() {
        let table = parse(&payload(
            "timestamp,a,b\n\
             2024-03-01 00:00:00,OFF,4.0\n",
        ))
        .expect("parses");
        let rows = table.to_rows();
        assert_eq!(rows[0].values["a"], None);
        assert_eq!(rows[0].values["b"], Some(4.0));
    }
}
