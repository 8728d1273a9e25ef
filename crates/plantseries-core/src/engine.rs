//! The `ChartEngine` entry points: batch import and chart loading.
//!
//! Import takes raw CSV payloads for one machine, parses each one,
//! joins split exports when they qualify, and lands the rows in the
//! monthly partitions with refreshed catalog entries. One bad file
//! never sinks the batch; it is reported per file instead.
//!
//! Chart loading runs as a background job: a catalog-pruned partition
//! read, the coordinate transform, and downsampling, all inside one
//! cancelable task whose handle streams progress and exactly one
//! terminal event.

use std::collections::BTreeMap;
use std::path::PathBuf;

use snafu::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::chart::pipeline::{self, JobHandle, JobOutcome, JobStage, ProgressSink};
use crate::chart::sample::{SamplingStrategy, sample};
use crate::chart::transform::{TransformOutcome, XAxis, transform};
use crate::config::EngineConfig;
use crate::ingest::{MergeWarning, RawPayload, RowIssue, merge, merge_eligible, parse_with_progress};
use crate::model::{PartitionKey, Row, YearMonth};
use crate::storage::StoreRoot;
use crate::store::{Catalog, CatalogError, PartitionError, PartitionStore};

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine entry points.
#[derive(Debug, Snafu)]
pub enum EngineError {
    /// A partition write or read failed.
    #[snafu(display("Partition store failure: {source}"))]
    Partition {
        /// Underlying partition error.
        source: PartitionError,
    },

    /// Updating the catalog after a write failed.
    #[snafu(display("Catalog failure: {source}"))]
    Catalog {
        /// Underlying catalog error.
        source: CatalogError,
    },
}

/// Outcome of one import batch.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Files that parsed and landed in storage.
    pub success_count: usize,
    /// Files that failed to parse.
    pub failure_count: usize,
    /// Failure description per failed file.
    pub errors_by_file: BTreeMap<String, String>,
    /// Skipped rows per successfully parsed file.
    pub issues_by_file: BTreeMap<String, Vec<RowIssue>>,
    /// Whether the batch was joined into one table before storage.
    pub merged: bool,
    /// Anomalies observed while joining.
    pub merge_warnings: Vec<MergeWarning>,
}

/// One chart query.
#[derive(Debug, Clone)]
pub struct ChartRequest {
    /// Plant to read from.
    pub plant: String,
    /// Machine within the plant.
    pub machine: String,
    /// Optional time window; `None` reads everything.
    pub range: Option<crate::model::TimeRange>,
    /// What the x coordinates are computed from.
    pub x_axis: XAxis,
    /// Parameters to plot, one series each.
    pub y_parameters: Vec<String>,
    /// Total point budget across all series; 0 disables sampling.
    pub sample_target: usize,
    /// How over-budget series are reduced.
    pub strategy: SamplingStrategy,
}

/// The public face of the engine: owns the store, the catalog, and the
/// tuning configuration. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChartEngine {
    store: PartitionStore,
    catalog: Catalog,
    config: EngineConfig,
}

impl ChartEngine {
    /// An engine over the given store root, with default tuning.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, EngineConfig::default())
    }

    /// An engine with explicit tuning.
    pub fn with_config(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let root = StoreRoot::new(root);
        Self {
            store: PartitionStore::new(root.clone()),
            catalog: Catalog::new(root),
            config,
        }
    }

    /// The underlying partition store.
    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// The underlying catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Import a batch of raw CSV payloads for one machine.
    ///
    /// Each file is parsed independently; a parse failure is recorded
    /// in the report and the rest of the batch proceeds. When the
    /// parsed tables qualify as halves of one split export they are
    /// joined first. Rows are then grouped by calendar month, appended
    /// to the partitions, and the affected catalog entries are
    /// recomputed.
    pub async fn import_files(
        &self,
        files: &[RawPayload],
        plant: &str,
        machine: &str,
    ) -> EngineResult<ImportReport> {
        let mut report = ImportReport::default();
        let mut tables = Vec::new();

        for payload in files {
            let parsed = parse_with_progress(payload, self.config.progress_rows, |rows| {
                log::debug!("{}: parsed {rows} rows", payload.name);
            });
            match parsed {
                Ok(table) => {
                    if !table.issues.is_empty() {
                        report
                            .issues_by_file
                            .insert(payload.name.clone(), table.issues.clone());
                    }
                    tables.push(table);
                    report.success_count += 1;
                }
                Err(e) => {
                    log::warn!("import of {} failed: {e}", payload.name);
                    report.failure_count += 1;
                    report.errors_by_file.insert(payload.name.clone(), e.to_string());
                }
            }
        }

        let rows: Vec<Row> = if merge_eligible(&tables) {
            let merged = merge(&tables);
            report.merged = true;
            report.merge_warnings = merged.warnings;
            merged.rows
        } else {
            tables.iter().flat_map(|t| t.to_rows()).collect()
        };

        let mut by_month: BTreeMap<YearMonth, Vec<Row>> = BTreeMap::new();
        for row in rows {
            by_month
                .entry(YearMonth::from_timestamp(row.timestamp))
                .or_default()
                .push(row);
        }

        for (month, month_rows) in by_month {
            let key = PartitionKey::new(plant, machine, month);
            self.store
                .write(&key, &month_rows, true)
                .await
                .context(PartitionSnafu)?;
            self.catalog
                .update(&self.store, &key)
                .await
                .context(CatalogSnafu)?;
        }

        log::info!(
            "imported {}/{} files into {plant}/{machine} ({} merged)",
            report.success_count,
            files.len(),
            if report.merged { "batch" } else { "not" }
        );
        Ok(report)
    }

    /// Start a chart-loading job and return its handle.
    ///
    /// The job reads the catalog-pruned partitions, transforms rows to
    /// series points, and downsamples, reporting progress throughout.
    /// Cancel through the handle; a cancelled job never delivers
    /// `Done`.
    pub fn load_chart_data(&self, request: ChartRequest) -> JobHandle {
        let store = self.store.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        pipeline::spawn(move |mut sink, token| async move {
            run_chart_job(store, catalog, config, request, &mut sink, &token).await
        })
    }
}

/// Progress bands: loading 0-30, transforming 30-80, sampling 80-99.
/// The pipeline runner supplies the final 100.
async fn run_chart_job(
    store: PartitionStore,
    catalog: Catalog,
    config: EngineConfig,
    request: ChartRequest,
    sink: &mut ProgressSink,
    token: &CancellationToken,
) -> JobOutcome {
    sink.report(JobStage::Loading, 1).await;
    if token.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let rows = match load_rows(&store, &catalog, &request).await {
        Ok(rows) => rows,
        Err(e) => return JobOutcome::Failed(e.to_string()),
    };
    sink.report(JobStage::Loading, 30).await;
    if token.is_cancelled() {
        return JobOutcome::Cancelled;
    }

    let outcome = transform(
        &rows,
        &request.x_axis,
        &request.y_parameters,
        config.chunk_size,
        token,
        |done, total| {
            let percent = 30 + done * 50 / total.max(1);
            sink.report_sync(JobStage::Transforming, percent as u8);
        },
    );
    let series = match outcome {
        TransformOutcome::Complete(series) => series,
        TransformOutcome::Cancelled => return JobOutcome::Cancelled,
    };

    sink.report(JobStage::Sampling, 80).await;
    if token.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    let sampled = sample(series, request.sample_target, request.strategy);
    sink.report(JobStage::Sampling, 99).await;

    JobOutcome::Done(sampled)
}

async fn load_rows(
    store: &PartitionStore,
    catalog: &Catalog,
    request: &ChartRequest,
) -> Result<Vec<Row>, PartitionError> {
    // Consult the catalog first: when every recorded month misses the
    // window, the query is answered without opening a single file. An
    // unavailable catalog is only a lost optimization.
    if let Some(range) = request.range {
        match catalog.entries(&request.plant, &request.machine).await {
            Ok(entries) if !entries.is_empty() => {
                if !entries.values().any(|e| range.intersects(e.ts_min, e.ts_max)) {
                    return Ok(Vec::new());
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("catalog unavailable, scanning partitions: {e}");
            }
        }
    }

    let mut needed: Vec<String> = request.y_parameters.clone();
    if let XAxis::Parameter { name } = &request.x_axis {
        if !needed.contains(name) {
            needed.push(name.clone());
        }
    }
    store
        .read(&request.plant, &request.machine, request.range, Some(&needed))
        .await
}
