mod committee;
mod config;
mod decoder;
mod l1;
mod member_client;
pub mod metrics;
mod resolver;
mod store;
mod synchronizer;
mod types;
mod watcher;

#[cfg(test)]
mod test_utils;

use ethers::types::H256;
use std::time::Duration;
use thiserror::Error;

pub use committee::CommitteeRegistry;
pub use config::SynchronizerConfig;
pub use decoder::decode_sequence_batches;
pub use l1::{EthL1Client, EventStream, L1Client, SequenceBatches};
pub use member_client::{JsonRpcMemberClient, MemberClient};
pub use resolver::DataResolver;
pub use store::{
    get_key_for_col, DbColumn, KeyValueStore, KeyValueTransaction, MemoryStore,
    TransactionalStore, LAST_PROCESSED_BLOCK_KEY,
};
pub use synchronizer::{start_block_from, BatchSynchronizer, SyncState};
pub use types::{BatchRef, CommitteeMember, ContentKey, OffChainData, RawEvent};
pub use watcher::{EventWatcher, Subscription, WatchOutcome};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Subscription error: {0}")]
    Subscription(String),
    #[error("Failed to decode sequence batches in tx {tx_hash:?}: {reason}")]
    Decode { tx_hash: H256, reason: String },
    #[error("No data found for key {0:?}")]
    NotFound(ContentKey),
    #[error("Committee member at {endpoint} failed: {reason}")]
    Member { endpoint: String, reason: String },
    #[error("Data for key {key:?} hashes to {actual:?}")]
    PayloadMismatch { key: ContentKey, actual: H256 },
    #[error("Storage error: {operation} - {reason}")]
    Storage {
        operation: &'static str,
        reason: String,
    },
    #[error("Committee lookup failed: {0}")]
    Committee(String),
    #[error("Operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Synchronizer is stopping")]
    Cancelled,
}

impl Error {
    pub(crate) fn storage(operation: &'static str, reason: impl ToString) -> Self {
        Self::Storage {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Errors that a retry of the same operation may clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Subscription(_)
                | Error::Member { .. }
                | Error::Timeout { .. }
                | Error::Committee(_)
                | Error::Storage { .. }
        )
    }

    /// True when no committee member could produce the data, as opposed to
    /// something being broken locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
