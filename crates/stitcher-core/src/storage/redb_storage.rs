use crate::error::{Result, StitchError};
use crate::storage::filters::{Page, StoreStats};
use crate::storage::tables::*;
use crate::storage::traits::GraphView;
use crate::storage::txn::{GraphSnapshot, GraphTxn};
use crate::types::{DataSource, Entity, EntityId};
use redb::{Database, ReadableTable};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Embedded graph store backed by a single redb file.
///
/// Readers get consistent snapshots and never block the writer. Writes go
/// through [`GraphStore::write`], which commits the closure's changes
/// atomically or discards all of them.
#[derive(Clone)]
pub struct GraphStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphStore").field("path", &self.path).finish()
    }
}

impl GraphStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES)?;
            let _ = write_txn.open_table(EDGES)?;
            let _ = write_txn.open_table(PAYLOADS)?;
            let _ = write_txn.open_table(DATASOURCES)?;
            let _ = write_txn.open_table(STITCHES)?;
            let _ = write_txn.open_table(EDGE_TUPLES)?;
            let _ = write_txn.open_multimap_table(EDGES_BY_ENTITY)?;
            let _ = write_txn.open_multimap_table(STITCH_INDEX)?;
            let _ = write_txn.open_multimap_table(PROPERTY_INDEX)?;
            let _ = write_txn.open_multimap_table(ENTITIES_BY_LABEL)?;
            let _ = write_txn.open_multimap_table(ENTITIES_BY_SOURCE)?;
            let _ = write_txn.open_multimap_table(STITCHES_BY_VERSION)?;
            let _ = write_txn.open_multimap_table(STITCH_PROPERTY_INDEX)?;
            let _ = write_txn.open_multimap_table(EXTERNAL_ID_INDEX)?;
            let _ = write_txn.open_multimap_table(STITCH_EXTERNAL_INDEX)?;
            let _ = write_txn.open_table(LABEL_NAMES)?;
            let _ = write_txn.open_table(PROPERTY_NAMES)?;
            let _ = write_txn.open_table(RELATIONSHIP_NAMES)?;
            let mut meta = write_txn.open_table(META)?;
            if is_new {
                meta.insert(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_string().as_bytes())?;
            }
        }
        write_txn.commit()?;

        log::debug!("opened graph store at {}", path.display());
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Refuse to open files written by a different schema.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(CURRENT_SCHEMA_VERSION)
        };

        match version.cmp(&CURRENT_SCHEMA_VERSION) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Less => Err(StitchError::Validation(format!(
                "Store schema v{} is older than current v{}. Re-ingest into a new store.",
                version, CURRENT_SCHEMA_VERSION
            ))),
            std::cmp::Ordering::Greater => Err(StitchError::Validation(format!(
                "Store schema v{} is newer than this binary v{}. Upgrade stitcher.",
                version, CURRENT_SCHEMA_VERSION
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the last committed state.
    pub fn read(&self) -> Result<GraphSnapshot> {
        Ok(GraphSnapshot::new(self.db.begin_read()?))
    }

    /// Run `f` inside one write transaction. `Ok` commits; `Err` rolls back
    /// every change `f` made and returns the error unchanged.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&GraphTxn) -> Result<T>,
    {
        let txn = GraphTxn::new(self.db.begin_write()?);
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    log::warn!("rollback after '{}' failed: {}", e, abort);
                }
                Err(e)
            }
        }
    }

    // === Convenience reads over a fresh snapshot ===

    pub fn entity(&self, id: EntityId) -> Result<Option<Entity>> {
        self.read()?.entity(id)
    }

    pub fn entities(&self, page: Page, labels: &[&str]) -> Result<Vec<Entity>> {
        self.read()?.entities(page, labels)
    }

    pub fn datasources(&self) -> Result<Vec<DataSource>> {
        self.read()?.datasources()
    }

    pub fn count(&self, labels: &[&str]) -> Result<u64> {
        self.read()?.count(labels)
    }

    pub fn last_modified(&self) -> Result<u64> {
        self.read()?.last_modified()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let snapshot = self.read()?;
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

        Ok(StoreStats {
            entity_count: snapshot.meta_u64(ENTITY_COUNT_KEY)?.unwrap_or(0),
            edge_count: snapshot.meta_u64(EDGE_COUNT_KEY)?.unwrap_or(0),
            datasource_count: snapshot.datasources()?.len() as u64,
            stitch_versions: snapshot
                .meta_u64(STITCH_VERSION_KEY)?
                .unwrap_or(0)
                .try_into()
                .unwrap_or(u32::MAX),
            last_modified: snapshot.last_modified()?,
            db_size_bytes,
        })
    }

    /// Copy the store file. Only safe while no write is in flight.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        std::fs::copy(&self.path, path)?;
        Ok(())
    }
}
