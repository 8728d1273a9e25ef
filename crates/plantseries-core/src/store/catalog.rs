//! The per-machine catalog sidecar.
//!
//! `_catalog.json` maps partition months to summary entries used for
//! query pruning. The catalog is a derived cache, never authoritative:
//! [`Catalog::update`] recomputes an entry from the partition's actual
//! contents, and a consumer that finds the catalog disagreeing with the
//! data must trust the data and trigger an update, not the other way
//! around.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::model::{PartitionKey, YearMonth};
use crate::storage::{self, StorageError, StoreRoot};
use crate::store::layout;
use crate::store::partition::{PartitionError, PartitionStore};

/// Result alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised by catalog maintenance.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CatalogError {
    /// Filesystem failure reading or writing the sidecar.
    #[snafu(display("Storage failure: {source}"))]
    Storage {
        /// Underlying filesystem error.
        source: StorageError,
    },

    /// The sidecar exists but is not valid JSON.
    #[snafu(display("Malformed catalog at {path}: {source}"))]
    Malformed {
        /// Sidecar file involved.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Reading the partition while recomputing an entry failed.
    #[snafu(display("Cannot summarize partition: {source}"))]
    Partition {
        /// Underlying partition error.
        source: PartitionError,
    },
}

/// Summary of one partition, recomputed from its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Number of rows in the partition.
    pub row_count: u64,
    /// Earliest row timestamp.
    pub ts_min: DateTime<Utc>,
    /// Latest row timestamp.
    pub ts_max: DateTime<Utc>,
    /// Parameter names present, sorted.
    pub parameters: Vec<String>,
}

type CatalogMap = BTreeMap<String, CatalogEntry>;

/// Handle to the catalog sidecars of one store root.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: StoreRoot,
    update_locks: Arc<Mutex<std::collections::HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Catalog {
    /// A catalog over the given root directory.
    pub fn new(root: StoreRoot) -> Self {
        Self {
            root,
            update_locks: Arc::new(Mutex::new(std::collections::HashMap::new())),
        }
    }

    fn lock_for(&self, plant: &str, machine: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .update_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(format!("{plant}/{machine}")).or_default().clone()
    }

    /// Recompute the entry for `key` from the partition's contents and
    /// upsert it into the sidecar.
    ///
    /// A missing or empty partition removes the entry. Returns the entry
    /// that was written, `None` when it was removed.
    pub async fn update(
        &self,
        store: &PartitionStore,
        key: &PartitionKey,
    ) -> CatalogResult<Option<CatalogEntry>> {
        let lock = self.lock_for(&key.plant, &key.machine);
        let _guard = lock.lock().await;

        let rows = store.read_partition(key).await.context(PartitionSnafu)?;
        let entry = summarize(&rows);

        let mut map = self.load(&key.plant, &key.machine).await?;
        let month_key = key.month.to_string();
        match &entry {
            Some(entry) => {
                map.insert(month_key, entry.clone());
            }
            None => {
                map.remove(&month_key);
            }
        }
        self.save(&key.plant, &key.machine, &map).await?;

        log::debug!(
            "catalog entry for {key}: {}",
            entry
                .as_ref()
                .map(|e| format!("{} rows", e.row_count))
                .unwrap_or_else(|| "removed".to_string())
        );
        Ok(entry)
    }

    /// The recorded entry for `key`, `None` when absent.
    pub async fn lookup(&self, key: &PartitionKey) -> CatalogResult<Option<CatalogEntry>> {
        let map = self.load(&key.plant, &key.machine).await?;
        Ok(map.get(&key.month.to_string()).cloned())
    }

    /// All recorded entries for one machine, keyed by month.
    pub async fn entries(
        &self,
        plant: &str,
        machine: &str,
    ) -> CatalogResult<BTreeMap<YearMonth, CatalogEntry>> {
        let map = self.load(plant, machine).await?;
        // Entries with an unparseable month key are dropped rather than
        // failing the lookup; the sidecar is only a cache.
        Ok(map
            .into_iter()
            .filter_map(|(k, v)| k.parse::<YearMonth>().ok().map(|m| (m, v)))
            .collect())
    }

    async fn load(&self, plant: &str, machine: &str) -> CatalogResult<CatalogMap> {
        let rel = layout::catalog_path(plant, machine);
        let text = match storage::read_to_string(&self.root, &rel).await {
            Ok(text) => text,
            Err(StorageError::NotFound { .. }) => return Ok(CatalogMap::new()),
            Err(e) => return Err(e).context(StorageSnafu),
        };
        serde_json::from_str(&text).context(MalformedSnafu {
            path: rel.display().to_string(),
        })
    }

    async fn save(&self, plant: &str, machine: &str, map: &CatalogMap) -> CatalogResult<()> {
        let rel = layout::catalog_path(plant, machine);
        let json = serde_json::to_vec_pretty(map).context(MalformedSnafu {
            path: rel.display().to_string(),
        })?;
        storage::write_atomic(&self.root, &rel, &json)
            .await
            .context(StorageSnafu)
    }
}

fn summarize(rows: &[crate::model::Row]) -> Option<CatalogEntry> {
    let first = rows.first()?;
    let mut ts_min = first.timestamp;
    let mut ts_max = first.timestamp;
    let mut parameters = std::collections::BTreeSet::new();
    for row in rows {
        ts_min = ts_min.min(row.timestamp);
        ts_max = ts_max.max(row.timestamp);
        parameters.extend(row.values.keys().cloned());
    }
    Some(CatalogEntry {
        row_count: rows.len() as u64,
        ts_min,
        ts_max,
        parameters: parameters.into_iter().collect(),
    })
}
