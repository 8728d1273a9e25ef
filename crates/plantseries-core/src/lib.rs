//! Core engine for browsing plant-sensor time series as charts.
//!
//! This crate provides the foundational pieces for `plantseries`:
//!
//! - Parsers that classify heterogeneous CSV exports into a canonical
//!   tabular form, including merging of horizontally-split files
//!   (`ingest` module).
//! - Date-partitioned Parquet storage keyed by plant and machine, with a
//!   rebuildable catalog used for query pruning (`store` module).
//! - A chart pipeline that turns stored rows into per-series point
//!   streams and downsamples them for rendering, running as cancelable
//!   background jobs with progress reporting (`chart` module).
//! - A `ChartEngine` entry point that ties import and query flows
//!   together for the UI layer (`engine` module).
//!
//! Higher-level integration crates (a desktop UI, a CLI, export tools)
//! are expected to depend on this core crate rather than re-implementing
//! the ingestion and storage logic.
#![deny(missing_docs)]
pub mod chart;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod model;
pub mod storage;
pub mod store;
