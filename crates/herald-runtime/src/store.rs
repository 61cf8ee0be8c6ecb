//! Durable sled-backed key-value store.

use std::path::Path;
use std::sync::Arc;

use herald_core::{KeyValueStore, StoreError, StoreResult};
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::config::StorageConfig;

const TREE_STATE: &str = "herald_state";

/// [`KeyValueStore`] over one sled tree.
///
/// `update` maps onto sled's compare-and-swap loop, so it is atomic across
/// threads sharing the same database.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
    sync_writes: bool,
}

impl SledStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(to_store_error)?;
        info!(path = %path.display(), sync_writes, "Opened durable store");
        Self::new(db, sync_writes)
    }

    /// Opens a throwaway database that is removed when dropped.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(to_store_error)?;
        debug!("Opened temporary store");
        Self::new(db, false)
    }

    /// Opens the store described by `config`.
    pub fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        if config.temporary {
            Self::temporary()
        } else {
            Self::open(config.resolved_path(), config.sync_writes)
        }
    }

    pub fn new(db: Db, sync_writes: bool) -> StoreResult<Self> {
        let tree = db.open_tree(TREE_STATE).map_err(to_store_error)?;
        Ok(Self {
            db,
            tree,
            sync_writes,
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The underlying database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    fn after_write(&self) -> StoreResult<()> {
        if self.sync_writes {
            self.tree.flush().map_err(to_store_error)?;
        }
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value = self.tree.get(key).map_err(to_store_error)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.tree.insert(key, value).map_err(to_store_error)?;
        self.after_write()
    }

    fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value = self.tree.remove(key).map_err(to_store_error)?;
        self.after_write()?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn update(
        &self,
        key: &str,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StoreResult<()> {
        self.tree
            .fetch_and_update(key, |current| f(current))
            .map_err(to_store_error)?;
        self.after_write()
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush().map_err(to_store_error)?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("tree", &TREE_STATE)
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

fn to_store_error(err: sled::Error) -> StoreError {
    match err {
        sled::Error::Io(io) => StoreError::from(io),
        other => StoreError::Backend(other.to_string()),
    }
}
