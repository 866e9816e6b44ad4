//! Catalog operations over a database directory.
//!
//! Layout per database path: one manifest file per table
//! (`<db>/<table>.json`) and one shard subdirectory per table
//! (`<db>/<table>/`). Any directory holding manifests is a valid catalog;
//! there is no separate catalog index file.
//!
//! Concurrency contract:
//! - mutations take the table's exclusive lock, reads its shared lock;
//! - manifest writes go through [`write_atomically`], so a concurrent
//!   reader observes either the pre-write or post-write manifest, never a
//!   partial one.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use msf_common::{MsfError, Result, Schema};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::manifest::{now_ms, Manifest, ShardRef};

/// A shard file staged by an insert, before id assignment.
#[derive(Debug)]
pub struct PendingShard {
    /// Temporary file to be renamed into the shard directory.
    pub temp_path: PathBuf,
    /// Rows stored in the staged file.
    pub row_count: u64,
}

/// Catalog handle: resolves `(database_path, table_name)` to manifests and
/// serializes mutations per table.
///
/// The handle owns no data; it only keys a lock registry. It is an explicit
/// collaborator injected into the engine rather than a process-wide
/// singleton.
#[derive(Debug, Default)]
pub struct Catalog {
    locks: Mutex<HashMap<(PathBuf, String), Arc<RwLock<()>>>>,
}

impl Catalog {
    /// Create an empty catalog handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifest file for a table.
    pub fn manifest_path(db_path: &Path, table: &str) -> PathBuf {
        db_path.join(format!("{table}.json"))
    }

    /// Shard directory for a table.
    pub fn shard_dir(db_path: &Path, table: &str) -> PathBuf {
        db_path.join(table)
    }

    /// Absolute path of one shard file.
    pub fn shard_file(db_path: &Path, table: &str, shard: &ShardRef) -> PathBuf {
        Self::shard_dir(db_path, table).join(&shard.path)
    }

    fn table_lock(&self, db_path: &Path, table: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry((db_path.to_path_buf(), table.to_string()))
                .or_default(),
        )
    }

    /// Create an empty manifest for `table`.
    ///
    /// Fails with `AlreadyExists` unless `if_not_exists`; returns whether a
    /// table was actually created.
    pub fn create_table(
        &self,
        db_path: &Path,
        table: &str,
        schema: Schema,
        rows_per_shard: usize,
        if_not_exists: bool,
    ) -> Result<bool> {
        let lock = self.table_lock(db_path, table);
        let _guard = lock.write();

        let manifest_path = Self::manifest_path(db_path, table);
        if manifest_path.exists() {
            if if_not_exists {
                return Ok(false);
            }
            return Err(MsfError::AlreadyExists(format!("table '{table}'")));
        }
        fs::create_dir_all(db_path)?;
        fs::create_dir_all(Self::shard_dir(db_path, table))?;
        let manifest = Manifest::new(table, schema, rows_per_shard);
        manifest.save(&manifest_path)?;
        debug!(table, operator = "CatalogCreate", "created table manifest");
        Ok(true)
    }

    /// Remove the manifest and delete the table's shards.
    ///
    /// Fails with `NotFound` unless `if_exists`; returns whether a table was
    /// actually dropped. The manifest is removed first so a crash between
    /// the two steps leaves only orphan shard files, never a manifest
    /// pointing at deleted shards.
    pub fn drop_table(&self, db_path: &Path, table: &str, if_exists: bool) -> Result<bool> {
        let lock = self.table_lock(db_path, table);
        let _guard = lock.write();

        let manifest_path = Self::manifest_path(db_path, table);
        if !manifest_path.exists() {
            if if_exists {
                return Ok(false);
            }
            return Err(MsfError::NotFound(format!("table '{table}'")));
        }
        fs::remove_file(&manifest_path)?;
        let shard_dir = Self::shard_dir(db_path, table);
        if shard_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&shard_dir) {
                warn!(
                    table,
                    error = %e,
                    operator = "CatalogDrop",
                    "shard directory removal failed; leaving orphan shards"
                );
            }
        }
        debug!(table, operator = "CatalogDrop", "dropped table");
        Ok(true)
    }

    /// Read the current manifest under the table's shared lock.
    pub fn open_manifest(&self, db_path: &Path, table: &str) -> Result<Manifest> {
        let lock = self.table_lock(db_path, table);
        let _guard = lock.read();
        Manifest::load(&Self::manifest_path(db_path, table))
    }

    /// Atomically append staged shards, assigning monotonically increasing
    /// shard ids, and return the assigned descriptors.
    pub fn append_shards(
        &self,
        db_path: &Path,
        table: &str,
        staged: Vec<PendingShard>,
    ) -> Result<Vec<ShardRef>> {
        let lock = self.table_lock(db_path, table);
        let _guard = lock.write();

        let manifest_path = Self::manifest_path(db_path, table);
        let mut manifest = Manifest::load(&manifest_path)?;
        let shard_dir = Self::shard_dir(db_path, table);
        fs::create_dir_all(&shard_dir)?;

        let mut next_id = manifest.next_shard_id();
        let mut assigned = Vec::with_capacity(staged.len());
        for pending in staged {
            let file_name = format!("shard-{next_id}.jsonl");
            fs::rename(&pending.temp_path, shard_dir.join(&file_name))?;
            assigned.push(ShardRef {
                shard_id: next_id,
                path: file_name,
                row_count: pending.row_count,
            });
            next_id = next_id.next();
        }
        manifest.shards.extend(assigned.iter().cloned());
        manifest.save(&manifest_path)?;
        debug!(
            table,
            appended = assigned.len(),
            total = manifest.shards.len(),
            operator = "CatalogAppend",
            "appended shards"
        );
        Ok(assigned)
    }
}

/// Replace `path` with `content` atomically.
///
/// Writes to a staged temp file, moves the current file aside as a backup,
/// then renames the staged file into place; on rename failure the backup is
/// restored. Readers therefore always see a complete file.
pub(crate) fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .map(std::borrow::ToOwned::to_owned)
        .unwrap_or_else(|| ".".into());
    fs::create_dir_all(&parent)?;

    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("manifest");
    let stamp = now_ms();
    let staged = parent.join(format!(".msf_staged_{stem}_{stamp}.tmp"));
    fs::write(&staged, content)?;

    if !path.exists() {
        return fs::rename(&staged, path).map_err(|e| {
            MsfError::Internal(format!(
                "manifest commit failed: {} -> {} ({e})",
                staged.display(),
                path.display()
            ))
        });
    }

    let backup = parent.join(format!(".msf_backup_{stem}_{stamp}.tmp"));
    fs::rename(path, &backup).map_err(|e| {
        MsfError::Internal(format!(
            "manifest backup rename failed: {} -> {} ({e})",
            path.display(),
            backup.display()
        ))
    })?;

    match fs::rename(&staged, path) {
        Ok(_) => {
            let _ = fs::remove_file(backup);
            Ok(())
        }
        Err(e) => {
            let _ = fs::rename(&backup, path);
            let _ = fs::remove_file(&staged);
            Err(MsfError::Internal(format!(
                "manifest commit failed: {} -> {} ({e})",
                staged.display(),
                path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msf_common::{ColumnDef, ColumnType};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::required("id", ColumnType::Integer),
            ColumnDef::nullable("v", ColumnType::Double),
        ])
        .unwrap()
    }

    fn stage_shard(dir: &Path, rows: u64) -> PendingShard {
        static NEXT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let temp_path = dir.join(format!("staged-{n}.tmp"));
        std::fs::write(&temp_path, b"{}").expect("stage shard file");
        PendingShard {
            temp_path,
            row_count: rows,
        }
    }

    #[test]
    fn create_is_idempotent_only_with_if_not_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Catalog::new();
        assert!(catalog
            .create_table(dir.path(), "t", schema(), 100, false)
            .unwrap());
        assert!(!catalog
            .create_table(dir.path(), "t", schema(), 100, true)
            .unwrap());
        let err = catalog
            .create_table(dir.path(), "t", schema(), 100, false)
            .unwrap_err();
        assert!(matches!(err, MsfError::AlreadyExists(_)));
    }

    #[test]
    fn drop_respects_if_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Catalog::new();
        let err = catalog.drop_table(dir.path(), "t", false).unwrap_err();
        assert!(matches!(err, MsfError::NotFound(_)));
        assert!(!catalog.drop_table(dir.path(), "t", true).unwrap());

        catalog
            .create_table(dir.path(), "t", schema(), 100, false)
            .unwrap();
        assert!(catalog.drop_table(dir.path(), "t", false).unwrap());
        assert!(!Catalog::manifest_path(dir.path(), "t").exists());
        assert!(!Catalog::shard_dir(dir.path(), "t").exists());
    }

    #[test]
    fn append_assigns_monotonic_ids_across_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Catalog::new();
        catalog
            .create_table(dir.path(), "t", schema(), 100, false)
            .unwrap();

        let first = catalog
            .append_shards(
                dir.path(),
                "t",
                vec![stage_shard(dir.path(), 4), stage_shard(dir.path(), 3)],
            )
            .unwrap();
        assert_eq!(first[0].shard_id.0, 0);
        assert_eq!(first[1].shard_id.0, 1);

        let second = catalog
            .append_shards(dir.path(), "t", vec![stage_shard(dir.path(), 3)])
            .unwrap();
        assert_eq!(second[0].shard_id.0, 2);

        let manifest = catalog.open_manifest(dir.path(), "t").unwrap();
        assert_eq!(manifest.shards.len(), 3);
        assert_eq!(manifest.total_rows(), 10);
        for shard in &manifest.shards {
            assert!(Catalog::shard_file(dir.path(), "t", shard).exists());
        }
    }

    #[test]
    fn concurrent_reader_never_sees_partial_shard_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = Arc::new(Catalog::new());
        catalog
            .create_table(dir.path(), "t", schema(), 100, false)
            .unwrap();

        let db = dir.path().to_path_buf();
        let writer_catalog = Arc::clone(&catalog);
        let writer_db = db.clone();
        let writer = std::thread::spawn(move || {
            for _ in 0..20 {
                let staged = vec![
                    stage_shard(&writer_db, 1),
                    stage_shard(&writer_db, 1),
                    stage_shard(&writer_db, 1),
                ];
                writer_catalog
                    .append_shards(&writer_db, "t", staged)
                    .unwrap();
            }
        });

        // Appends land three shards at a time, so every observed length must
        // be a multiple of three and ids must stay contiguous.
        for _ in 0..200 {
            let manifest = catalog.open_manifest(&db, "t").unwrap();
            assert_eq!(manifest.shards.len() % 3, 0);
            for (i, shard) in manifest.shards.iter().enumerate() {
                assert_eq!(shard.shard_id.0, i as u64);
            }
        }
        writer.join().expect("writer thread");
    }
}
