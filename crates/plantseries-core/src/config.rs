//! Engine tuning knobs.

/// Configuration shared by the parser and the chart pipeline.
///
/// The defaults are sized so that progress callbacks fire often enough
/// for a responsive UI without dominating the work itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of rows the coordinate transformer processes between
    /// progress reports and cancellation checks.
    pub chunk_size: usize,
    /// Number of parsed rows between parser progress callbacks.
    pub progress_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2_048,
            progress_rows: 1_000,
        }
    }
}
