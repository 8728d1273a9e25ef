//! Wrapper prelude.
//!
//! The `plantseries` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::ingest;
pub use crate::{
    ChartEngine, ChartRequest, ElapsedUnit, EngineConfig, EngineError, ImportReport, JobEvent,
    JobHandle, JobId, JobStage, PartitionKey, Row, SamplingStrategy, SeriesMap, SeriesPoint,
    TimeRange, XAxis, YearMonth,
};
