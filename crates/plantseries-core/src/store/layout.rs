//! On-disk layout conventions.
//!
//! ```text
//! <root>/<plant>/<machine>/<YYYY-MM>.parquet   one partition per month
//! <root>/<plant>/<machine>/_catalog.json       derived pruning sidecar
//! ```
//!
//! The month is encoded in the partition file name so readers can prune
//! candidates against a time range before opening any file.

use std::path::PathBuf;

use crate::model::{PartitionKey, YearMonth};

/// Name of the timestamp column in every partition schema.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Extension of partition data files.
pub const PARTITION_EXT: &str = "parquet";

/// File name of the per-machine catalog sidecar. The leading underscore
/// keeps it from ever parsing as a `YYYY-MM` partition name.
pub const CATALOG_FILE: &str = "_catalog.json";

/// Store-relative directory holding one machine's partitions.
pub fn machine_dir(plant: &str, machine: &str) -> PathBuf {
    PathBuf::from(plant).join(machine)
}

/// Store-relative path of one partition file.
pub fn partition_path(key: &PartitionKey) -> PathBuf {
    machine_dir(&key.plant, &key.machine).join(format!("{}.{PARTITION_EXT}", key.month))
}

/// Store-relative path of one machine's catalog sidecar.
pub fn catalog_path(plant: &str, machine: &str) -> PathBuf {
    machine_dir(plant, machine).join(CATALOG_FILE)
}

/// Month encoded in a partition file name, `None` for anything that is
/// not a `YYYY-MM.parquet` name (the catalog sidecar, stray files).
pub fn month_from_file_name(name: &str) -> Option<YearMonth> {
    let stem = name.strip_suffix(".parquet")?;
    stem.parse().ok()
}
