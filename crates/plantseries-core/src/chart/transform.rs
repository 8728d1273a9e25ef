//! Row-to-coordinate transformation.
//!
//! Turns stored rows into per-series point lists ready for plotting.
//! Every x-axis mode produces plain `f64` coordinates so the sampler
//! downstream operates on uniform numbers: datetime axes encode epoch
//! milliseconds, elapsed axes scale the offset from the first row, and
//! parameter axes take the named column's value.
//!
//! Null handling is the whole point of this module: a null y-cell emits
//! no point for that series (a gap the chart renders as a line break)
//! while sibling series from the same row are unaffected, and a null
//! x-cell drops the row because no series can place it.
//!
//! Work proceeds in bounded chunks with a progress callback and a
//! cooperative cancellation check per chunk, so multi-million-row
//! transforms stay responsive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::model::Row;

/// Unit for the elapsed-time x-axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElapsedUnit {
    /// Seconds since the first row.
    Seconds,
    /// Minutes since the first row.
    Minutes,
    /// Hours since the first row.
    Hours,
}

impl ElapsedUnit {
    fn millis_per_unit(self) -> f64 {
        match self {
            ElapsedUnit::Seconds => 1_000.0,
            ElapsedUnit::Minutes => 60_000.0,
            ElapsedUnit::Hours => 3_600_000.0,
        }
    }
}

/// What the x coordinate of every point is computed from.
#[derive(Debug, Clone, PartialEq)]
pub enum XAxis {
    /// Epoch milliseconds of the row timestamp.
    DateTime,
    /// Time since the first row, scaled to `unit`.
    Elapsed {
        /// Scale of the elapsed values.
        unit: ElapsedUnit,
    },
    /// The named parameter's value; rows where it is null are dropped.
    Parameter {
        /// Parameter supplying the x values.
        name: String,
    },
}

/// One chart point, tagged with the source row's timestamp so tooltips
/// can show the original instant regardless of the x-axis mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Timestamp of the row the point came from.
    pub source_ts: DateTime<Utc>,
}

/// Points per series, keyed by series id (the y-parameter name).
pub type SeriesMap = BTreeMap<String, Vec<SeriesPoint>>;

/// How a transform run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// All rows processed.
    Complete(SeriesMap),
    /// Cancellation observed at a chunk boundary; partial output is
    /// discarded.
    Cancelled,
}

/// Transform `rows` into one series per y-parameter.
///
/// `on_progress` receives `(rows_done, rows_total)` after every chunk.
/// Output order per series follows row order, so for timestamp-sorted
/// input the datetime and elapsed axes come out x-sorted already.
pub fn transform(
    rows: &[Row],
    axis: &XAxis,
    y_parameters: &[String],
    chunk_size: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(usize, usize),
) -> TransformOutcome {
    let chunk_size = chunk_size.max(1);
    let total = rows.len();
    let first_ts = rows.first().map(|r| r.timestamp);

    let mut series: SeriesMap = y_parameters
        .iter()
        .map(|p| (p.clone(), Vec::new()))
        .collect();

    let mut done = 0;
    for chunk in rows.chunks(chunk_size) {
        if cancel.is_cancelled() {
            return TransformOutcome::Cancelled;
        }

        for row in chunk {
            let Some(x) = x_value(row, axis, first_ts) else {
                continue;
            };
            for param in y_parameters {
                let Some(y) = row.values.get(param).copied().flatten() else {
                    continue;
                };
                if let Some(points) = series.get_mut(param) {
                    points.push(SeriesPoint {
                        x,
                        y,
                        source_ts: row.timestamp,
                    });
                }
            }
        }

        done += chunk.len();
        on_progress(done, total);
    }

    // A parameter that produced no points yields no series, so an empty
    // window comes back as an empty map rather than a map of husks.
    series.retain(|_, points| !points.is_empty());
    TransformOutcome::Complete(series)
}

fn x_value(row: &Row, axis: &XAxis, first_ts: Option<DateTime<Utc>>) -> Option<f64> {
    match axis {
        XAxis::DateTime => Some(row.timestamp.timestamp_millis() as f64),
        XAxis::Elapsed { unit } => {
            let first = first_ts?;
            let millis = (row.timestamp - first).num_milliseconds() as f64;
            Some(millis / unit.millis_per_unit())
        }
        XAxis::Parameter { name } => row.values.get(name).copied().flatten(),
    }
}
