use crate::metrics::{LAST_PROCESSED_BLOCK, STORE_COMMITS};
use crate::{ContentKey, Error, OffChainData, Result};
use prometheus::IntGauge;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use strum::{EnumString, IntoStaticStr};
use tracing::*;

pub const LAST_PROCESSED_BLOCK_KEY: &[u8] = b"last_processed_block";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumString)]
pub enum DbColumn {
    #[strum(serialize = "ocd")]
    OffChainData,
    #[strum(serialize = "syn")]
    SyncInfo,
}

/// Prefix `key` with the column name, giving one flat key space.
pub fn get_key_for_col(column: &str, key: &[u8]) -> Vec<u8> {
    let mut result = column.as_bytes().to_vec();
    result.extend_from_slice(key);
    result
}

/// Column oriented byte store able to apply a set of writes atomically.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get_bytes(&self, column: DbColumn, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn key_exists(&self, column: DbColumn, key: &[u8]) -> Result<bool> {
        Ok(self.get_bytes(column, key)?.is_some())
    }

    fn begin(&self) -> Result<Box<dyn KeyValueTransaction + '_>>;
}

/// Writes staged by a transaction become visible all together on `commit`,
/// or not at all.
pub trait KeyValueTransaction: Send {
    fn put(&mut self, column: DbColumn, key: &[u8], value: &[u8]) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// In-memory backend, used for `--dev` runs and tests. Writes to a column or
/// commits can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    db: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    failing_column: RwLock<Option<DbColumn>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn open() -> Self {
        Self::default()
    }

    /// Make every `put` into `column` fail, or clear the fault with `None`.
    pub fn fail_writes_to(&self, column: Option<DbColumn>) {
        *self
            .failing_column
            .write()
            .unwrap_or_else(PoisonError::into_inner) = column;
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.db.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bytes(&self, column: DbColumn, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let column_key = get_key_for_col(column.into(), key);
        Ok(self
            .db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&column_key)
            .cloned())
    }

    fn begin(&self) -> Result<Box<dyn KeyValueTransaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            ops: Vec::new(),
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl KeyValueTransaction for MemoryTransaction<'_> {
    fn put(&mut self, column: DbColumn, key: &[u8], value: &[u8]) -> Result<()> {
        let failing = *self
            .store
            .failing_column
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing == Some(column) {
            let name: &'static str = column.into();
            return Err(Error::storage("put", format!("writes to {name} are failing")));
        }
        self.ops
            .push((get_key_for_col(column.into(), key), value.to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::storage("commit", "commits are failing"));
        }
        let mut db = self.store.db.write().unwrap_or_else(PoisonError::into_inner);
        db.extend(self.ops);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Persists resolved batch data together with the sync progress marker.
pub struct TransactionalStore<S> {
    db: Arc<S>,
    timeout: Duration,
    progress: IntGauge,
}

impl<S: KeyValueStore> TransactionalStore<S> {
    pub fn new(db: Arc<S>, timeout: Duration) -> Self {
        Self {
            db,
            timeout,
            progress: LAST_PROCESSED_BLOCK.clone(),
        }
    }

    /// Report progress on `gauge` instead of the registry's `last_processed_block`.
    pub fn with_progress_gauge(mut self, gauge: IntGauge) -> Self {
        self.progress = gauge;
        self
    }

    /// Whether data for `key` is already stored.
    pub async fn exists(&self, key: ContentKey) -> Result<bool> {
        self.run("exists", move |db| {
            db.key_exists(DbColumn::OffChainData, key.as_bytes())
        })
        .await
    }

    /// Last block whose batches are all stored, 0 if nothing was processed yet.
    /// The progress gauge follows what was read.
    pub async fn last_processed_block(&self) -> Result<u64> {
        let block = self.run("last_processed_block", |db| {
            match db.get_bytes(DbColumn::SyncInfo, LAST_PROCESSED_BLOCK_KEY)? {
                None => Ok(0),
                Some(bytes) => {
                    let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        Error::storage(
                            "last_processed_block",
                            format!("expected 8 bytes, found {}", bytes.len()),
                        )
                    })?;
                    Ok(u64::from_be_bytes(bytes))
                }
            }
        })
        .await?;

        self.progress.set(block as i64);
        Ok(block)
    }

    /// Store `data` and move the progress marker to `block` in one
    /// transaction. Nothing is visible unless everything is.
    pub async fn commit(&self, block: u64, data: Vec<OffChainData>) -> Result<()> {
        let entries = data.len();
        let result = self
            .run("commit", move |db| store_batch_data(db, block, &data))
            .await;

        match &result {
            Ok(()) => {
                STORE_COMMITS.with_label_values(&["success"]).inc();
                self.progress.set(block as i64);
                debug!("Stored {entries} entries, last processed block is now {block}");
            }
            Err(err) => {
                STORE_COMMITS.with_label_values(&["failure"]).inc();
                error!("Failed to store {entries} entries for block {block}: {err}");
            }
        }
        result
    }

    /// Run a blocking storage operation bounded by the db timeout. An
    /// operation that times out is left to finish in the background.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::storage(operation, join_err)),
            Err(_) => Err(Error::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}

fn store_batch_data<S: KeyValueStore + ?Sized>(db: &S, block: u64, data: &[OffChainData]) -> Result<()> {
    let mut tx = db.begin()?;

    let staged = data
        .iter()
        .try_for_each(|item| tx.put(DbColumn::OffChainData, item.key.as_bytes(), &item.value))
        .and_then(|_| tx.put(DbColumn::SyncInfo, LAST_PROCESSED_BLOCK_KEY, &block.to_be_bytes()));

    match staged {
        Ok(()) => tx.commit(),
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                error!("Failed to roll back transaction after error {err}: {rollback_err}");
            }
            Err(err)
        }
    }
}
