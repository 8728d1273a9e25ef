//! # plantseries
//!
//! Plant-sensor time series: CSV ingestion, monthly Parquet partitions,
//! and cancelable chart preparation jobs.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `plantseries-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use plantseries::prelude::*;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Ingestion namespace (wrapper-only).
pub mod ingest {
    pub use plantseries_core::ingest::{
        Cell, MergeWarning, MergedTable, ParseError, ParsedRow, ParsedTable, RawPayload, RowIssue,
        TableFormat, merge, merge_eligible, parse, parse_with_progress,
    };
}

pub use plantseries_core::chart::{
    ElapsedUnit, JobEvent, JobHandle, JobId, JobStage, ParseStrategyError, SamplingStrategy,
    SeriesMap, SeriesPoint, XAxis,
};
pub use plantseries_core::config::EngineConfig;
pub use plantseries_core::engine::{ChartEngine, ChartRequest, EngineError, ImportReport};
pub use plantseries_core::model::{PartitionKey, Row, TimeRange, YearMonth};
pub use plantseries_core::store::{Catalog, CatalogEntry, PartitionStore};
