#![deny(missing_docs)]

//! Shared configuration, error types, ids, data model, and observability
//! primitives for MiniSnowflake crates.
//!
//! Architecture role:
//! - defines engine/runtime configuration passed across layers
//! - provides the common [`MsfError`] / [`Result`] contracts
//! - hosts the schema and row-batch model exchanged between coordinator and
//!   workers
//! - hosts the metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`types`]
//! - [`batch`]
//! - [`metrics`]

/// Row-batch and value model exchanged between coordinator and workers.
pub mod batch;
/// Shared engine/runtime configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;
/// Column types, column definitions, and table schemas.
pub mod types;

pub use batch::{RowBatch, Value};
pub use config::EngineConfig;
pub use error::{MsfError, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
pub use types::{ColumnDef, ColumnType, Schema};
