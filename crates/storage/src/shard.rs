//! Shard file access.
//!
//! The engine treats shard contents as opaque; everything that touches
//! bytes goes through [`ShardStore`]. The bundled [`JsonShardStore`] keeps a
//! JSON-lines representation (schema header line, then one JSON array per
//! row), which is enough for the coordinator, workers, and tests to share a
//! filesystem. Columnar formats (CSV/Parquet) plug in behind the same
//! trait.

use std::fs;
use std::io::Write;
use std::path::Path;

use msf_common::{ColumnDef, MsfError, Result, RowBatch, Schema, Value};

/// Storage contract for shard files and insert sources.
pub trait ShardStore: Send + Sync {
    /// Load one shard file into memory.
    fn read_shard(&self, path: &Path) -> Result<RowBatch>;

    /// Persist one shard file.
    fn write_shard(&self, path: &Path, batch: &RowBatch) -> Result<()>;

    /// Load an `INSERT INTO .. FROM` source file, coercing rows to the
    /// table schema.
    fn read_source(&self, path: &Path, schema: &Schema) -> Result<RowBatch>;
}

/// JSON-lines shard store.
#[derive(Debug, Default, Clone)]
pub struct JsonShardStore;

impl JsonShardStore {
    /// Construct the store.
    pub fn new() -> Self {
        Self
    }
}

impl ShardStore for JsonShardStore {
    fn read_shard(&self, path: &Path) -> Result<RowBatch> {
        let text = fs::read_to_string(path)?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| MsfError::Internal(format!("shard {} is empty", path.display())))?;
        let schema: Schema = serde_json::from_str(header).map_err(|e| {
            MsfError::Internal(format!("shard {} header is corrupt: {e}", path.display()))
        })?;
        let mut rows = Vec::new();
        for line in lines {
            let row: Vec<Value> = serde_json::from_str(line).map_err(|e| {
                MsfError::Internal(format!("shard {} row is corrupt: {e}", path.display()))
            })?;
            rows.push(row);
        }
        RowBatch::new(schema, rows)
    }

    fn write_shard(&self, path: &Path, batch: &RowBatch) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        let header = serde_json::to_string(&batch.schema)
            .map_err(|e| MsfError::Internal(format!("shard header encode failed: {e}")))?;
        writeln!(file, "{header}")?;
        for row in &batch.rows {
            let line = serde_json::to_string(row)
                .map_err(|e| MsfError::Internal(format!("shard row encode failed: {e}")))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    fn read_source(&self, path: &Path, schema: &Schema) -> Result<RowBatch> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MsfError::NotFound(format!("source file {} does not exist", path.display()))
            } else {
                MsfError::Io(e)
            }
        })?;
        let mut rows = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: Vec<Value> = serde_json::from_str(line).map_err(|e| {
                MsfError::Parse(format!("source line {}: invalid row: {e}", line_no + 1))
            })?;
            if raw.len() != schema.len() {
                return Err(MsfError::Parse(format!(
                    "source line {}: expected {} values, got {}",
                    line_no + 1,
                    schema.len(),
                    raw.len()
                )));
            }
            let row = raw
                .into_iter()
                .zip(&schema.columns)
                .map(|(value, col)| coerce_value(value, col, line_no + 1))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        RowBatch::new(schema.clone(), rows)
    }
}

fn coerce_value(value: Value, col: &ColumnDef, line_no: usize) -> Result<Value> {
    if value.is_null() {
        if col.not_null {
            return Err(MsfError::Parse(format!(
                "source line {line_no}: NULL in NOT NULL column '{}'",
                col.name
            )));
        }
        return Ok(Value::Null);
    }
    let coerced = match (&value, col.ty.is_float(), col.ty.is_integer()) {
        (Value::Int(v), true, _) => Some(Value::Float(*v as f64)),
        (Value::Int(_), _, true) | (Value::Float(_), true, _) => Some(value.clone()),
        (Value::Bool(_), _, _) if col.ty == msf_common::ColumnType::Boolean => {
            Some(value.clone())
        }
        (Value::Str(_), false, false) if col.ty != msf_common::ColumnType::Boolean => {
            Some(value.clone())
        }
        _ => None,
    };
    coerced.ok_or_else(|| {
        MsfError::Parse(format!(
            "source line {line_no}: value {value:?} does not fit column '{}' ({})",
            col.name,
            col.ty.canonical_name()
        ))
    })
}
