use db_key::Key;
use leveldb::database::batch::{Batch, Writebatch};
use leveldb::database::kv::KV;
use leveldb::database::Database;
use leveldb::options::{Options, ReadOptions, WriteOptions};
use std::{fs, path::Path, path::PathBuf};
use synchronizer::{get_key_for_col, DbColumn, Error, KeyValueStore, KeyValueTransaction, Result};
use tracing::*;

pub const DEFAULT_ROOT_DIR: &str = "etc/data/dac/node_0";

/// Owned byte key, as required by the leveldb bindings.
pub struct BytesKey {
    key: Vec<u8>,
}

impl Key for BytesKey {
    fn from_u8(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    fn as_slice<T, F: Fn(&[u8]) -> T>(&self, f: F) -> T {
        f(self.key.as_slice())
    }
}

pub struct LevelDbStore {
    db: Database<BytesKey>,
}

impl LevelDbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut options = Options::new();
        options.create_if_missing = true;

        let db = Database::open(path, options).map_err(|err| Error::Storage {
            operation: "open",
            reason: err.to_string(),
        })?;
        Ok(Self { db })
    }

    pub fn new_disk(path_override: Option<String>) -> eyre::Result<Self> {
        let db_path = if let Some(path) = path_override {
            PathBuf::from(path)
        } else {
            PathBuf::from(DEFAULT_ROOT_DIR).join("sync_db")
        };

        info!("Using db path {}", db_path.display());
        let db_path = ensure_dir_exists(db_path).map_err(eyre::Error::msg)?;
        Ok(Self::open(&db_path)?)
    }
}

impl KeyValueStore for LevelDbStore {
    fn get_bytes(&self, column: DbColumn, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let column_key = get_key_for_col(column.into(), key);
        self.db
            .get(ReadOptions::new(), BytesKey::from_u8(&column_key))
            .map_err(|err| Error::Storage {
                operation: "get",
                reason: err.to_string(),
            })
    }

    fn begin(&self) -> Result<Box<dyn KeyValueTransaction + '_>> {
        Ok(Box::new(LevelDbTransaction {
            store: self,
            ops: Vec::new(),
        }))
    }
}

// Writes are staged here and handed to leveldb as one `Writebatch` on commit.
struct LevelDbTransaction<'a> {
    store: &'a LevelDbStore,
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl KeyValueTransaction for LevelDbTransaction<'_> {
    fn put(&mut self, column: DbColumn, key: &[u8], value: &[u8]) -> Result<()> {
        self.ops
            .push((get_key_for_col(column.into(), key), value.to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut batch = Writebatch::new();
        for (key, value) in &self.ops {
            batch.put(BytesKey::from_u8(key), value);
        }
        self.store
            .db
            .write(WriteOptions::new(), &batch)
            .map_err(|err| Error::Storage {
                operation: "commit",
                reason: err.to_string(),
            })
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Discarding {} staged writes", self.ops.len());
        Ok(())
    }
}

fn ensure_dir_exists(path: PathBuf) -> std::result::Result<PathBuf, String> {
    fs::create_dir_all(&path).map_err(|e| format!("Unable to create {}: {}", path.display(), e))?;
    Ok(path)
}
