//! The partition store: one Parquet file per (plant, machine, month).
//!
//! Schema of every partition: a non-nullable millisecond `timestamp`
//! column plus one nullable `Float64` column per parameter, parameters
//! sorted by name. Writes to one partition key are serialized through a
//! per-key async mutex and land via atomic replace, so concurrent
//! imports for the same machine and month cannot interleave and readers
//! never see a torn file.
//!
//! Reads are resilient: candidate files are pruned by the month encoded
//! in their name before any bytes are touched, the requested parameter
//! subset is pushed down as a Parquet column projection, and a partition
//! that fails to decode degrades to zero rows with a warning instead of
//! failing the whole query.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;

use crate::model::{PartitionKey, Row, TimeRange};
use crate::storage::{self, StorageError, StoreRoot};
use crate::store::layout::{self, TIMESTAMP_COLUMN};

/// Result alias for partition operations.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Errors raised by the partition store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PartitionError {
    /// Filesystem failure underneath a partition operation.
    #[snafu(display("Storage failure: {source}"))]
    Storage {
        /// Underlying filesystem error.
        source: StorageError,
    },

    /// Parquet encoding or decoding failed.
    #[snafu(display("Parquet failure at {path}: {source}"))]
    Parquet {
        /// Partition file involved.
        path: String,
        /// Underlying Parquet error.
        source: parquet::errors::ParquetError,
    },

    /// Arrow batch construction or iteration failed.
    #[snafu(display("Arrow failure at {path}: {source}"))]
    Arrow {
        /// Partition file involved.
        path: String,
        /// Underlying Arrow error.
        source: arrow::error::ArrowError,
    },

    /// A partition file does not have the expected column shape.
    #[snafu(display("Bad partition schema at {path}: {detail}"))]
    Schema {
        /// Partition file involved.
        path: String,
        /// What was wrong with it.
        detail: String,
    },
}

/// Handle to the partitioned data files of one store root.
///
/// Cheap to clone; clones share the per-key write locks.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: StoreRoot,
    write_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PartitionStore {
    /// A store over the given root directory.
    pub fn new(root: StoreRoot) -> Self {
        Self {
            root,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, key: &PartitionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    /// Write `rows` to the partition at `key`.
    ///
    /// With `append` the existing partition contents are read back and
    /// unioned with the new rows; at equal timestamps the existing rows
    /// sort first and duplicates coexist. Without `append` the partition
    /// is replaced outright. Either way the result is sorted by
    /// timestamp and lands atomically.
    pub async fn write(&self, key: &PartitionKey, rows: &[Row], append: bool) -> PartitionResult<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let rel = layout::partition_path(key);
        let mut combined: Vec<Row> = Vec::new();
        if append {
            combined = self.read_file(&rel, None).await?;
        }
        combined.extend_from_slice(rows);
        combined.sort_by_key(|r| r.timestamp);

        let parameters: Vec<String> = combined
            .iter()
            .flat_map(|r| r.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let bytes = encode_partition(&combined, &parameters, &rel.display().to_string())?;
        storage::write_atomic(&self.root, &rel, &bytes)
            .await
            .context(StorageSnafu)?;

        log::debug!(
            "wrote partition {key}: {} rows, {} parameters (append={append})",
            combined.len(),
            parameters.len()
        );
        Ok(())
    }

    /// All rows of the partition at `key`, empty when the file is
    /// missing.
    pub async fn read_partition(&self, key: &PartitionKey) -> PartitionResult<Vec<Row>> {
        self.read_file(&layout::partition_path(key), None).await
    }

    /// Query one machine's rows, optionally restricted to a time window
    /// and a parameter subset.
    ///
    /// Partitions whose file-name month falls outside the window are
    /// skipped without being opened. A partition that exists but cannot
    /// be decoded contributes zero rows and a warning; other partitions
    /// still contribute. Rows come back ordered by timestamp ascending.
    pub async fn read(
        &self,
        plant: &str,
        machine: &str,
        range: Option<TimeRange>,
        parameters: Option<&[String]>,
    ) -> PartitionResult<Vec<Row>> {
        let dir = layout::machine_dir(plant, machine);
        let names = storage::list_file_names(&self.root, &dir)
            .await
            .context(StorageSnafu)?;

        let mut rows = Vec::new();
        for name in names {
            let Some(month) = layout::month_from_file_name(&name) else {
                continue;
            };
            if let Some(range) = range {
                if !range.covers_month(month) {
                    continue;
                }
            }

            let rel = dir.join(&name);
            match self.read_file(&rel, parameters).await {
                Ok(partition_rows) => rows.extend(partition_rows),
                Err(e) => {
                    log::warn!("skipping unreadable partition {}: {e}", rel.display());
                }
            }
        }

        if let Some(range) = range {
            rows.retain(|r| range.contains(r.timestamp));
        }
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    /// Whether the partition at `key` exists on disk.
    pub async fn exists(&self, key: &PartitionKey) -> bool {
        storage::file_exists(&self.root, &layout::partition_path(key)).await
    }

    /// Delete rows from the partition at `key`, returning how many were
    /// removed.
    ///
    /// Without a range the whole file goes; with a range the surviving
    /// rows are rewritten in place (or the file is removed when none
    /// survive).
    pub async fn delete(&self, key: &PartitionKey, range: Option<TimeRange>) -> PartitionResult<usize> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let rel = layout::partition_path(key);
        let existing = self.read_file(&rel, None).await?;
        if existing.is_empty() {
            return Ok(0);
        }

        let kept: Vec<Row> = match range {
            None => Vec::new(),
            Some(range) => existing
                .iter()
                .filter(|r| !range.contains(r.timestamp))
                .cloned()
                .collect(),
        };
        let removed = existing.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        if kept.is_empty() {
            storage::remove_file(&self.root, &rel)
                .await
                .context(StorageSnafu)?;
        } else {
            let parameters: Vec<String> = kept
                .iter()
                .flat_map(|r| r.values.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let bytes = encode_partition(&kept, &parameters, &rel.display().to_string())?;
            storage::write_atomic(&self.root, &rel, &bytes)
                .await
                .context(StorageSnafu)?;
        }

        log::debug!("deleted {removed} rows from partition {key}");
        Ok(removed)
    }

    /// Decode one partition file; a missing file yields zero rows.
    async fn read_file(
        &self,
        rel: &std::path::Path,
        parameters: Option<&[String]>,
    ) -> PartitionResult<Vec<Row>> {
        let bytes = match storage::read_all_bytes(&self.root, rel).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e).context(StorageSnafu),
        };
        decode_partition(Bytes::from(bytes), &rel.display().to_string(), parameters)
    }
}

fn partition_schema(parameters: &[String]) -> SchemaRef {
    let mut fields = vec![Field::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Millisecond, None),
        false,
    )];
    for p in parameters {
        fields.push(Field::new(p, DataType::Float64, true));
    }
    Arc::new(Schema::new(fields))
}

fn encode_partition(rows: &[Row], parameters: &[String], path: &str) -> PartitionResult<Vec<u8>> {
    let schema = partition_schema(parameters);

    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp.timestamp_millis()).collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(TimestampMillisecondArray::from(timestamps))];
    for p in parameters {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|r| r.values.get(p).copied().flatten())
            .collect();
        columns.push(Arc::new(Float64Array::from(values)));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu { path })?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None).context(ParquetSnafu { path })?;
    writer.write(&batch).context(ParquetSnafu { path })?;
    writer.close().context(ParquetSnafu { path })?;
    Ok(buf)
}

fn decode_partition(
    bytes: Bytes,
    path: &str,
    parameters: Option<&[String]>,
) -> PartitionResult<Vec<Row>> {
    let mut builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes).context(ParquetSnafu { path })?;

    if let Some(params) = parameters {
        // Projection keeps unrequested columns out of memory entirely.
        // Names that do not exist in this partition are simply absent
        // from the projected schema.
        let mask = {
            let file_schema = builder.schema().clone();
            let wanted: Vec<&str> = file_schema
                .fields()
                .iter()
                .map(|f| f.name().as_str())
                .filter(|name| *name == TIMESTAMP_COLUMN || params.iter().any(|p| p == name))
                .collect();
            ProjectionMask::columns(builder.parquet_schema(), wanted)
        };
        builder = builder.with_projection(mask);
    }

    let reader = builder.build().context(ParquetSnafu { path })?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context(ArrowSnafu { path })?;
        let schema = batch.schema();
        let ts_idx = schema.index_of(TIMESTAMP_COLUMN).map_err(|_| {
            SchemaSnafu {
                path,
                detail: format!("missing {TIMESTAMP_COLUMN:?} column"),
            }
            .build()
        })?;
        let ts = batch
            .column(ts_idx)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .context(SchemaSnafu {
                path,
                detail: "timestamp column is not millisecond-typed",
            })?;

        let mut value_columns = Vec::new();
        for (i, field) in schema.fields().iter().enumerate() {
            if i == ts_idx {
                continue;
            }
            let col = batch
                .column(i)
                .as_any()
                .downcast_ref::<Float64Array>()
                .context(SchemaSnafu {
                    path,
                    detail: format!("column {:?} is not Float64", field.name()),
                })?;
            value_columns.push((field.name().clone(), col));
        }

        for row_i in 0..batch.num_rows() {
            let timestamp = Utc
                .timestamp_millis_opt(ts.value(row_i))
                .single()
                .context(SchemaSnafu {
                    path,
                    detail: format!("timestamp {} out of range", ts.value(row_i)),
                })?;
            let values = value_columns
                .iter()
                .map(|(name, col)| {
                    let v = if col.is_null(row_i) {
                        None
                    } else {
                        Some(col.value(row_i))
                    };
                    (name.clone(), v)
                })
                .collect();
            rows.push(Row { timestamp, values });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC 3339 timestamp")
    }

    fn row(stamp: &str, values: &[(&str, Option<f64>)]) -> Row {
        Row {
            timestamp: ts(stamp),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn key(month: &str) -> PartitionKey {
        PartitionKey::new("plant-a", "press-1", month.parse().unwrap())
    }

    #[tokio::test]
    async fn write_then_read_round_trips() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));

        let rows = vec![
            row("2024-03-01T00:00:00Z", &[("temp", Some(1.5)), ("psi", None)]),
            row("2024-03-01T00:01:00Z", &[("temp", None), ("psi", Some(2.5))]),
        ];
        store.write(&key("2024-03"), &rows, false).await?;

        let back = store.read_partition(&key("2024-03")).await?;
        assert_eq!(back, rows);
        Ok(())
    }

    #[tokio::test]
    async fn append_keeps_existing_rows_first_at_equal_timestamps() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));
        let k = key("2024-03");

        store
            .write(&k, &[row("2024-03-01T00:00:00Z", &[("a", Some(1.0))])], false)
            .await?;
        store
            .write(&k, &[row("2024-03-01T00:00:00Z", &[("a", Some(2.0))])], true)
            .await?;

        let back = store.read_partition(&k).await?;
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].values["a"], Some(1.0));
        assert_eq!(back[1].values["a"], Some(2.0));
        Ok(())
    }

    #[tokio::test]
    async fn append_unions_parameter_sets() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));
        let k = key("2024-03");

        store
            .write(&k, &[row("2024-03-01T00:00:00Z", &[("a", Some(1.0))])], false)
            .await?;
        store
            .write(&k, &[row("2024-03-02T00:00:00Z", &[("b", Some(2.0))])], true)
            .await?;

        let back = store.read_partition(&k).await?;
        assert_eq!(back[0].values.get("b"), Some(&None));
        assert_eq!(back[1].values.get("a"), Some(&None));
        Ok(())
    }

    #[tokio::test]
    async fn read_prunes_by_month_and_filters_by_range() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));

        store
            .write(&key("2024-02"), &[row("2024-02-15T00:00:00Z", &[("a", Some(1.0))])], false)
            .await?;
        store
            .write(
                &key("2024-03"),
                &[
                    row("2024-03-01T00:00:00Z", &[("a", Some(2.0))]),
                    row("2024-03-20T00:00:00Z", &[("a", Some(3.0))]),
                ],
                false,
            )
            .await?;

        let range = TimeRange::new(ts("2024-03-01T00:00:00Z"), ts("2024-03-10T00:00:00Z"));
        let rows = store.read("plant-a", "press-1", Some(range), None).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values["a"], Some(2.0));
        Ok(())
    }

    #[tokio::test]
    async fn read_projects_requested_parameters() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));

        store
            .write(
                &key("2024-03"),
                &[row("2024-03-01T00:00:00Z", &[("a", Some(1.0)), ("b", Some(2.0))])],
                false,
            )
            .await?;

        let wanted = vec!["b".to_string()];
        let rows = store.read("plant-a", "press-1", None, Some(&wanted)).await?;
        assert_eq!(rows[0].values.len(), 1);
        assert_eq!(rows[0].values["b"], Some(2.0));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_machine_reads_empty() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));
        let rows = store.read("nowhere", "nothing", None, None).await?;
        assert!(rows.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_partition_degrades_to_zero_rows() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));

        store
            .write(&key("2024-03"), &[row("2024-03-01T00:00:00Z", &[("a", Some(1.0))])], false)
            .await?;
        tokio::fs::write(
            tmp.path().join("plant-a/press-1/2024-04.parquet"),
            b"not parquet",
        )
        .await?;

        let rows = store.read("plant-a", "press-1", None, None).await?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_without_range_removes_the_file() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));
        let k = key("2024-03");

        store
            .write(
                &k,
                &[
                    row("2024-03-01T00:00:00Z", &[("a", Some(1.0))]),
                    row("2024-03-02T00:00:00Z", &[("a", Some(2.0))]),
                ],
                false,
            )
            .await?;

        assert_eq!(store.delete(&k, None).await?, 2);
        assert!(!store.exists(&k).await);
        assert_eq!(store.delete(&k, None).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn delete_with_range_rewrites_survivors() -> TestResult {
        let tmp = TempDir::new()?;
        let store = PartitionStore::new(StoreRoot::new(tmp.path()));
        let k = key("2024-03");

        store
            .write(
                &k,
                &[
                    row("2024-03-01T00:00:00Z", &[("a", Some(1.0))]),
                    row("2024-03-05T00:00:00Z", &[("a", Some(2.0))]),
                    row("2024-03-09T00:00:00Z", &[("a", Some(3.0))]),
                ],
                false,
            )
            .await?;

        let range = TimeRange::new(ts("2024-03-04T00:00:00Z"), ts("2024-03-06T00:00:00Z"));
        assert_eq!(store.delete(&k, Some(range)).await?, 1);

        let back = store.read_partition(&k).await?;
        assert_eq!(back.len(), 2);
        assert!(back.iter().all(|r| r.values["a"] != Some(2.0)));
        Ok(())
    }
}
