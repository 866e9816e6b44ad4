//! Catalog and manifest persistence for MiniSnowflake.
//!
//! Architecture role:
//! - per-table manifest files (schema + ordered shard list) with atomic
//!   write-temp-then-rename replacement
//! - per-table shared/exclusive locking for catalog mutations
//! - shard store contract and the bundled JSON-lines implementation
//!
//! Key modules:
//! - [`catalog`]
//! - [`manifest`]
//! - [`shard`]

pub mod catalog;
pub mod manifest;
pub mod shard;

pub use catalog::{Catalog, PendingShard};
pub use manifest::{Manifest, ShardRef};
pub use shard::{JsonShardStore, ShardStore};
