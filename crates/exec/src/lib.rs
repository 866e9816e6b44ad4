//! Embedded single-shard SQL executor.
//!
//! Architecture role:
//! - evaluates one subquery (the dialect the planner emits: bare columns,
//!   `agg(col)` / `agg(*)`, conjunctive WHERE atoms, GROUP BY) over one
//!   in-memory row batch
//! - this is the bundled engine behind the worker contract; a different
//!   columnar engine can replace it behind the same `run_subquery` seam
//!
//! NULL handling follows SQL semantics: aggregates other than `COUNT(*)`
//! ignore NULLs, `IS [NOT] NULL` are the only null-aware predicates, and
//! any other comparison involving NULL is false.
//!
//! Grouped output is sorted by group key so per-round reduce results are
//! byte-stable across runs; floating-point accumulation always folds rows
//! in input order.

pub mod eval;

pub use eval::{execute_select, run_subquery};
