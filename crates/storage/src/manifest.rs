use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use msf_common::{MsfError, Result, Schema, ShardId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Descriptor of one physical shard file.
///
/// `path` is relative to the table's shard directory and opaque to the
/// engine; only the shard store interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRef {
    /// Monotonically assigned shard id.
    pub shard_id: ShardId,
    /// File name within the table's shard directory.
    pub path: String,
    /// Number of rows stored in the shard.
    pub row_count: u64,
}

/// Persistent per-table record: schema plus the ordered shard list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version, currently always 1.
    #[serde(default = "default_manifest_version")]
    pub manifest_version: u32,
    /// Table name the manifest belongs to.
    pub table_name: String,
    /// Stable table identity surviving renames of the database directory.
    pub table_id: Uuid,
    /// Creation time in unix milliseconds.
    pub created_at_ms: u64,
    /// Default shard size for inserts that give no `ROWS PER SHARD`.
    pub rows_per_shard: usize,
    /// Immutable table schema.
    pub schema: Schema,
    /// Ordered shard list.
    pub shards: Vec<ShardRef>,
}

fn default_manifest_version() -> u32 {
    1
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

impl Manifest {
    /// Fresh manifest for a newly created, empty table.
    pub fn new(table_name: impl Into<String>, schema: Schema, rows_per_shard: usize) -> Self {
        Self {
            manifest_version: 1,
            table_name: table_name.into(),
            table_id: Uuid::new_v4(),
            created_at_ms: now_ms(),
            rows_per_shard,
            schema,
            shards: Vec::new(),
        }
    }

    /// Next shard id to assign: one past the highest existing id.
    pub fn next_shard_id(&self) -> ShardId {
        self.shards
            .iter()
            .map(|s| s.shard_id.next())
            .max()
            .unwrap_or(ShardId(0))
    }

    /// Logical row count: the sum of per-shard row counts.
    pub fn total_rows(&self) -> u64 {
        self.shards.iter().map(|s| s.row_count).sum()
    }

    /// Load a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MsfError::NotFound(format!("manifest {} does not exist", path.display()))
            } else {
                MsfError::Io(e)
            }
        })?;
        serde_json::from_str(&text).map_err(|e| {
            MsfError::Internal(format!("manifest {} is corrupt: {e}", path.display()))
        })
    }

    /// Persist the manifest with atomic replacement.
    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string_pretty(self)
            .map_err(|e| MsfError::Internal(format!("manifest encode failed: {e}")))?;
        crate::catalog::write_atomically(path, payload.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msf_common::{ColumnDef, ColumnType};

    fn schema() -> Schema {
        Schema::new(vec![ColumnDef::nullable("a", ColumnType::Integer)]).unwrap()
    }

    #[test]
    fn shard_ids_are_monotonic() {
        let mut manifest = Manifest::new("t", schema(), 100);
        assert_eq!(manifest.next_shard_id(), ShardId(0));
        manifest.shards.push(ShardRef {
            shard_id: ShardId(0),
            path: "shard-0.jsonl".to_string(),
            row_count: 4,
        });
        manifest.shards.push(ShardRef {
            shard_id: ShardId(7),
            path: "shard-7.jsonl".to_string(),
            row_count: 3,
        });
        assert_eq!(manifest.next_shard_id(), ShardId(8));
        assert_eq!(manifest.total_rows(), 7);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.json");
        let manifest = Manifest::new("t", schema(), 100);
        manifest.save(&path).expect("save");
        let back = Manifest::load(&path).expect("load");
        assert_eq!(back, manifest);
    }

    #[test]
    fn load_missing_is_not_found() {
        let err = Manifest::load(Path::new("/nonexistent/t.json")).unwrap_err();
        assert!(matches!(err, MsfError::NotFound(_)));
    }
}
