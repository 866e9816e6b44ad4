//! Database front door.
//!
//! Receives one statement, parses it, resolves the table against the
//! catalog, and routes each statement kind down its own path: DDL/DML hit
//! the catalog directly, SELECT goes through the planner and the
//! distributed engine. The catalog and shard store are injected
//! collaborators, not process singletons.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use msf_common::{
    global_metrics, ColumnType, EngineConfig, MsfError, QueryId, Result, RowBatch, Schema, Value,
};
use msf_planner::plan_select;
use msf_sql::ast::{CreateTable, DropTable, InsertFrom, Select, Statement};
use msf_sql::parse_statement;
use msf_storage::{Catalog, PendingShard, ShardStore};
use tracing::info;

use crate::engine::{finalize, CancelToken, ExecutionEngine, ShardInput};

/// Client-facing query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Canonical type names in order.
    pub types: Vec<String>,
    /// Row-major values.
    pub rows: Vec<Vec<Value>>,
    /// Number of rows.
    pub row_count: usize,
}

impl QueryResult {
    fn from_batch(batch: RowBatch) -> Self {
        Self {
            columns: batch.schema.names(),
            types: batch.schema.type_names(),
            row_count: batch.rows.len(),
            rows: batch.rows,
        }
    }

    fn status(message: String) -> Self {
        Self {
            columns: vec!["status".to_string()],
            types: vec![ColumnType::Varchar.canonical_name().to_string()],
            rows: vec![vec![Value::Str(message)]],
            row_count: 1,
        }
    }
}

/// Statement entry point wired to a catalog, shard store, and engine.
pub struct Database {
    catalog: Arc<Catalog>,
    store: Arc<dyn ShardStore>,
    engine: ExecutionEngine,
    config: EngineConfig,
    next_query_id: AtomicU64,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

impl Database {
    /// Build the front door.
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn ShardStore>,
        engine: ExecutionEngine,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            engine,
            config,
            next_query_id: AtomicU64::new(1),
        }
    }

    /// The execution engine, mainly for registry access.
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Parse and execute one statement.
    pub async fn query(&self, db_path: &Path, sql: &str) -> Result<QueryResult> {
        self.query_with_cancel(db_path, sql, CancelToken::none())
            .await
    }

    /// Parse and execute one statement under a cancellation token.
    pub async fn query_with_cancel(
        &self,
        db_path: &Path,
        sql: &str,
        cancel: CancelToken,
    ) -> Result<QueryResult> {
        let statement = parse_statement(sql).map_err(MsfError::from)?;
        let kind = statement.kind();
        let result = match statement {
            Statement::CreateTable(create) => self.create_table(db_path, create),
            Statement::DropTable(drop) => self.drop_table(db_path, drop),
            Statement::InsertFrom(insert) => self.insert_from(db_path, insert),
            Statement::Select(select) => self.select(db_path, select, cancel).await,
        };
        global_metrics().inc_query(kind, if result.is_ok() { "ok" } else { "error" });
        result
    }

    fn create_table(&self, db_path: &Path, statement: CreateTable) -> Result<QueryResult> {
        let schema = Schema::new(statement.columns)?;
        let created = self.catalog.create_table(
            db_path,
            &statement.table,
            schema,
            self.config.default_rows_per_shard,
            statement.if_not_exists,
        )?;
        Ok(QueryResult::status(if created {
            format!("Created table '{}'", statement.table)
        } else {
            format!("Table '{}' already exists", statement.table)
        }))
    }

    fn drop_table(&self, db_path: &Path, statement: DropTable) -> Result<QueryResult> {
        let dropped = self
            .catalog
            .drop_table(db_path, &statement.table, statement.if_exists)?;
        Ok(QueryResult::status(if dropped {
            format!("Dropped table '{}'", statement.table)
        } else {
            format!("Table '{}' does not exist", statement.table)
        }))
    }

    fn insert_from(&self, db_path: &Path, statement: InsertFrom) -> Result<QueryResult> {
        let manifest = self.catalog.open_manifest(db_path, &statement.table)?;
        let rows_per_shard = statement
            .rows_per_shard
            .unwrap_or(manifest.rows_per_shard)
            .max(1);
        let source = self
            .store
            .read_source(Path::new(&statement.source), &manifest.schema)?;
        let total_rows = source.num_rows();

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let mut staged = Vec::new();
        for (i, chunk) in source.rows.chunks(rows_per_shard).enumerate() {
            let temp_path = db_path.join(format!(".msf_insert_{nanos}_{i}.tmp"));
            let batch = RowBatch::new(manifest.schema.clone(), chunk.to_vec())?;
            self.store.write_shard(&temp_path, &batch)?;
            staged.push(PendingShard {
                temp_path,
                row_count: chunk.len() as u64,
            });
        }
        let assigned = self
            .catalog
            .append_shards(db_path, &statement.table, staged)?;
        info!(
            table = %statement.table,
            rows = total_rows,
            shards = assigned.len(),
            operator = "DatabaseInsert",
            "insert complete"
        );
        Ok(QueryResult::status(format!(
            "Inserted {total_rows} rows into '{}' ({} shards)",
            statement.table,
            assigned.len()
        )))
    }

    async fn select(
        &self,
        db_path: &Path,
        statement: Select,
        cancel: CancelToken,
    ) -> Result<QueryResult> {
        let manifest = self.catalog.open_manifest(db_path, &statement.table)?;
        let plan = plan_select(&statement, &manifest.schema)?;
        let query_id = QueryId(self.next_query_id.fetch_add(1, Ordering::Relaxed));

        let batch = if manifest.shards.is_empty() {
            // No shards to fan out over: evaluate the map subquery once over
            // an empty batch so scalar aggregates produce their identity row.
            let empty = RowBatch::empty(manifest.schema.clone());
            let partial = msf_exec::run_subquery(&plan.map_sql, &empty)?;
            finalize(&plan, partial)?
        } else {
            let shards = manifest
                .shards
                .iter()
                .map(|shard| ShardInput {
                    shard_id: shard.shard_id,
                    path: Catalog::shard_file(db_path, &statement.table, shard)
                        .to_string_lossy()
                        .into_owned(),
                })
                .collect();
            self.engine.execute(query_id, &plan, shards, cancel).await?
        };
        Ok(QueryResult::from_batch(batch))
    }
}
