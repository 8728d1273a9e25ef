//! Date-partitioned Parquet storage with a per-machine catalog sidecar.
//!
//! One partition holds the rows of one machine for one calendar month.
//! The [`partition`] module owns the authoritative data files; the
//! [`catalog`] module maintains a derived pruning cache next to them.
//! When the two disagree, the partition files win and the catalog entry
//! is recomputed.

pub mod catalog;
pub mod layout;
pub mod partition;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use partition::{PartitionError, PartitionStore};
