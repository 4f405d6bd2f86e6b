//! # row-pipeline
//!
//! Visibility-driven fetch and transform scheduling for lazily loaded image rows.
//!
//! A long list of rows, each backed by a photo record, is only ever worked on
//! where the user is looking. Rows that become visible get their image fetched
//! and then filtered; rows that scroll away have their work cancelled; while
//! the user drags, nothing new starts.
//!
//! ## Design
//!
//! - **One coordination context** - The [`OperationTracker`] is an actor that
//!   owns the record store and all scheduling state
//! - **Bounded stage queues** - Fetch and transform each run in their own
//!   pool with a configurable concurrency limit
//! - **Cooperative cancellation** - Stage work checks its cancellation token
//!   and always reports exactly one outcome
//! - **Event-driven** - The view is told which rows to redraw, and any
//!   consumer can subscribe to tracker events
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use row_pipeline::{
//!     Config, OperationTracker, RecordStore, RowId, StageRunner, ViewAdapter, load_catalog,
//! };
//!
//! struct Console;
//!
//! impl ViewAdapter for Console {
//!     fn visible_rows(&self) -> Vec<RowId> {
//!         (0..10).map(RowId).collect()
//!     }
//!
//!     fn row_updated(&self, row: RowId) {
//!         println!("redraw row {row}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = RecordStore::from_catalog(load_catalog("photos.json"));
//!     let runner = StageRunner::from_config(&config)?;
//!
//!     let tracker = OperationTracker::spawn(store, runner, Arc::new(Console), &config)?;
//!     tracker.visible_set_changed((0..10).map(RowId).collect())?;
//!
//!     tracker.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Photo catalog loading
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Stage runner and the fetch/transform seams
pub mod pipeline;
/// Bounded-concurrency stage queues
pub mod queue;
/// Photo records
pub mod store;
/// Scheduling actor (decomposed into focused submodules)
pub mod tracker;
/// Core types
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use catalog::{CatalogEntry, load_catalog, parse_catalog, try_parse_catalog};
pub use config::{Config, FetchConfig, HttpConfig, QueueConfig, SepiaConfig};
pub use error::{Error, Result, StageError};
pub use pipeline::{HttpFetcher, ImageFetcher, ImageTransform, SepiaTransform, StageRunner};
pub use queue::{Completion, StageQueue, TaskHandle};
pub use store::{Photo, RecordStore};
pub use tracker::{OperationTracker, QueueStatus, TrackerHandle, ViewAdapter};
pub use types::{Event, Outcome, PhotoState, RowId, ScrollPhase, StageKind, TaskId};
