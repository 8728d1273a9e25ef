//! Merging of horizontally-split exports.
//!
//! Some plants export one logical table as several files, each carrying
//! the timestamp column plus a subset of the parameters. When a batch of
//! parsed tables is [`merge_eligible`], [`merge`] joins them on
//! timestamp into one table whose rows carry the union of all
//! parameters.
//!
//! Merging never fails: anomalies (a parameter appearing in more than
//! one file, a value slot already filled by an earlier file) are
//! reported as [`MergeWarning`]s with later-file precedence, and absent
//! contributions stay null.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::ingest::parse::ParsedTable;
use crate::model::Row;

/// Non-fatal anomaly observed while merging.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeWarning {
    /// The same parameter name appears in more than one input file.
    ParameterCollision {
        /// The duplicated parameter name.
        name: String,
        /// Source file whose values took precedence.
        winner: String,
    },
    /// Two files both supplied a value for the same timestamp and
    /// parameter; the later file's value was kept.
    TimestampCollision {
        /// The contested timestamp.
        timestamp: DateTime<Utc>,
        /// Parameter whose slot was overwritten.
        parameter: String,
    },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::ParameterCollision { name, winner } => {
                write!(f, "parameter {name:?} appears in multiple files; kept values from {winner}")
            }
            MergeWarning::TimestampCollision {
                timestamp,
                parameter,
            } => {
                write!(f, "duplicate value for {parameter:?} at {timestamp}; kept the later file's")
            }
        }
    }
}

/// Result of joining several parsed tables on timestamp.
#[derive(Debug, Clone)]
pub struct MergedTable {
    /// One row per distinct timestamp, ascending, each carrying an entry
    /// for every parameter.
    pub rows: Vec<Row>,
    /// Union of the input parameter names, in first-seen order.
    pub parameters: Vec<String>,
    /// Anomalies observed during the join.
    pub warnings: Vec<MergeWarning>,
}

/// Whether a batch of tables should be joined into one.
///
/// Requires at least two tables that share a timestamp column name,
/// carry pairwise-disjoint parameter sets, and cover pairwise
/// overlapping time ranges. Files whose ranges never intersect are
/// unrelated exports, not halves of one table.
pub fn merge_eligible(tables: &[ParsedTable]) -> bool {
    if tables.len() < 2 {
        return false;
    }

    let ts_column = &tables[0].headers[0];
    if !tables.iter().all(|t| &t.headers[0] == ts_column) {
        return false;
    }

    let mut seen = std::collections::BTreeSet::new();
    for table in tables {
        for param in table.parameters() {
            if !seen.insert(param.as_str()) {
                return false;
            }
        }
    }

    let mut bounds = Vec::with_capacity(tables.len());
    for table in tables {
        match table.time_bounds() {
            Some(b) => bounds.push(b),
            None => return false,
        }
    }
    for (i, &(min_a, max_a)) in bounds.iter().enumerate() {
        for &(min_b, max_b) in &bounds[i + 1..] {
            if max_a < min_b || max_b < min_a {
                return false;
            }
        }
    }

    true
}

/// Join tables on timestamp.
///
/// Builds a sorted index of every distinct timestamp, then fills each
/// row with the contributing values in input order. Later files win
/// contested slots; every anomaly is surfaced as a warning.
pub fn merge(tables: &[ParsedTable]) -> MergedTable {
    let mut parameters: Vec<String> = Vec::new();
    let mut warnings = Vec::new();

    for table in tables {
        for param in table.parameters() {
            if parameters.iter().any(|p| p == param) {
                warnings.push(MergeWarning::ParameterCollision {
                    name: param.clone(),
                    winner: table.source.clone(),
                });
            } else {
                parameters.push(param.clone());
            }
        }
    }

    let mut index: BTreeMap<DateTime<Utc>, BTreeMap<String, Option<f64>>> = BTreeMap::new();
    for table in tables {
        let params = table.parameters();
        for row in &table.rows {
            let slot = index.entry(row.timestamp).or_default();
            for (param, cell) in params.iter().zip(row.cells.iter()) {
                let value = cell.as_number();
                match slot.insert(param.clone(), value) {
                    Some(Some(_)) => warnings.push(MergeWarning::TimestampCollision {
                        timestamp: row.timestamp,
                        parameter: param.clone(),
                    }),
                    _ => {}
                }
            }
        }
    }

    let rows = index
        .into_iter()
        .map(|(timestamp, mut present)| Row {
            timestamp,
            values: parameters
                .iter()
                .map(|p| (p.clone(), present.remove(p).flatten()))
                .collect(),
        })
        .collect();

    MergedTable {
        rows,
        parameters,
        warnings,
    }
}
