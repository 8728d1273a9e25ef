//! Chart preparation: coordinate transformation, downsampling, and the
//! cancelable job pipeline that runs them.

pub mod pipeline;
pub mod sample;
pub mod transform;

pub use pipeline::{JobEvent, JobHandle, JobId, JobStage};
pub use sample::{ParseStrategyError, SamplingStrategy, sample};
pub use transform::{ElapsedUnit, SeriesMap, SeriesPoint, TransformOutcome, XAxis, transform};
