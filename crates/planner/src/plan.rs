//! Planned query model consumed by the execution engine.

use msf_common::Schema;
use serde::{Deserialize, Serialize};

/// How the engine combines per-shard answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// No aggregation; the result is the concatenation of partials.
    PassThrough,
    /// Aggregation without GROUP BY; exactly one output row.
    Scalar,
    /// Aggregation with GROUP BY; one output row per distinct key tuple.
    Grouped,
}

/// Final projection of one output column from the last remaining partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputExpr {
    /// Copy an internal partial column through under the output name.
    Carry {
        /// Internal column name in the partial schema.
        internal: String,
    },
    /// Recompose AVG from its SUM/COUNT decomposition; NULL when the count
    /// is zero.
    AvgRatio {
        /// Internal sum column name.
        sum: String,
        /// Internal count column name.
        cnt: String,
    },
}

/// One column of the user-facing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    /// User-facing column name (alias or derived name).
    pub name: String,
    /// How the value is produced from the final partial.
    pub expr: OutputExpr,
}

/// Immutable plan for one SELECT: a per-shard map subquery, an optional
/// reduce subquery applied to partials, and the final local projection.
///
/// Map and reduce subqueries share the same output schema
/// (`partial_schema`), so one reduce composes over any tree shape; the
/// engine applies `finalizers` once to the single remaining partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedQuery {
    /// Subquery executed per shard.
    pub map_sql: String,
    /// Subquery combining ≥2 partials, or `None` for pass-through plans.
    pub reduce_sql: Option<String>,
    /// Combination mode.
    pub mode: AggregationMode,
    /// GROUP BY columns (by table column name); empty unless grouped.
    pub group_by: Vec<String>,
    /// Schema every map/reduce partial must match.
    pub partial_schema: Schema,
    /// User-facing result schema.
    pub output_schema: Schema,
    /// Final projection; empty means the final partial is already the
    /// result (pass-through).
    pub finalizers: Vec<OutputColumn>,
}
