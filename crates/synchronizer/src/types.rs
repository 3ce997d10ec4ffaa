use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

/// Hash of the transactions of one batch, as sequenced on L1. Doubles as the
/// lookup key of the batch data held by the committee.
pub type ContentKey = H256;

/// Batch data kept off-chain, addressed by the keccak256 of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffChainData {
    pub key: ContentKey,
    pub value: Bytes,
}

impl OffChainData {
    pub fn new(key: ContentKey, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Builds the entry for `value`, deriving the key from its content.
    pub fn from_value(value: impl Into<Bytes>) -> Self {
        let value = value.into();
        Self {
            key: H256(keccak256(&value)),
            value,
        }
    }

    pub fn content_hash(&self) -> H256 {
        H256(keccak256(&self.value))
    }

    pub fn is_valid(&self) -> bool {
        self.content_hash() == self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitteeMember {
    pub address: Address,
    pub url: String,
}

/// A `SequenceBatches` log together with the input of the transaction that
/// emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub block_number: u64,
    pub tx_hash: H256,
    pub call_data: Bytes,
}

/// The batches announced by one event. `keys` keeps the on-chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRef {
    pub block_number: u64,
    pub keys: Vec<ContentKey>,
}
