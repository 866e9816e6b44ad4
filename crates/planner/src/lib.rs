//! Query planning for MiniSnowflake.
//!
//! Architecture role:
//! - rewrites a parsed SELECT plus its resolved schema into a
//!   [`PlannedQuery`]: a per-shard map subquery, an iterative reduce
//!   subquery over partials, and a final local projection
//! - the composition of map, reduce, and final projection is algebraically
//!   equivalent to the original statement applied to the concatenation of
//!   shards
//!
//! Key modules:
//! - [`plan`]
//! - [`rewrite`]

pub mod plan;
pub mod rewrite;

pub use plan::{AggregationMode, OutputColumn, OutputExpr, PlannedQuery};
pub use rewrite::{plan_select, REDUCE_RELATION};
