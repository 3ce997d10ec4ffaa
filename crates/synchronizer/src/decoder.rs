use crate::{BatchRef, ContentKey, Error, RawEvent, Result};
use ethers::abi::{parse_abi, Abi, Token};
use ethers::utils::hex;
use lazy_static::lazy_static;

const SEQUENCE_BATCHES: &str = "sequenceBatches";

// Call data interface of `Supernets2.sol`, restricted to the entry points
// that can emit `SequenceBatches` or share its contract.
lazy_static! {
    static ref SUPERNETS2_ABI: std::result::Result<Abi, String> = parse_abi(&[
        "struct BatchData { bytes32 transactionsHash; bytes32 globalExitRoot; uint64 timestamp; uint64 minForcedTimestamp; }",
        "struct ForcedBatchData { bytes transactions; bytes32 globalExitRoot; uint64 minForcedTimestamp; }",
        "function sequenceBatches(BatchData[] batches, address l2Coinbase, bytes signaturesAndAddrs)",
        "function sequenceForceBatches(ForcedBatchData[] batches)",
        "function forceBatch(bytes transactions, uint256 maticAmount)",
        "function verifyBatchesTrustedAggregator(uint64 pendingStateNum, uint64 initNumBatch, uint64 finalNewBatch, bytes32 newLocalExitRoot, bytes32 newStateRoot, bytes32[24] proof)",
    ])
    .map_err(|err| err.to_string());
}

pub(crate) fn supernets2_abi() -> Result<&'static Abi> {
    SUPERNETS2_ABI
        .as_ref()
        .map_err(|reason| Error::Config(format!("invalid Supernets2 ABI: {reason}")))
}

/// Extract the block number and the transactions hash of every sequenced
/// batch from a `SequenceBatches` event, in batch order.
pub fn decode_sequence_batches(event: &RawEvent) -> Result<BatchRef> {
    let fail = |reason: String| Error::Decode {
        tx_hash: event.tx_hash,
        reason,
    };

    if event.call_data.len() < 4 {
        return Err(fail(format!(
            "call data is {} bytes, shorter than a selector",
            event.call_data.len()
        )));
    }
    let (selector, input) = event.call_data.split_at(4);

    let function = supernets2_abi()?
        .functions()
        .find(|function| function.short_signature()[..] == *selector)
        .ok_or_else(|| fail(format!("unknown method selector 0x{}", hex::encode(selector))))?;
    if function.name != SEQUENCE_BATCHES {
        return Err(fail(format!("unexpected method {}", function.name)));
    }

    let batches = function
        .decode_input(input)
        .map_err(|err| fail(err.to_string()))?
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| fail("missing batch list".into()))?;

    let keys = batches
        .into_iter()
        .enumerate()
        .map(|(index, batch)| {
            transactions_hash(batch).ok_or_else(|| fail(format!("malformed batch at index {index}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BatchRef {
        block_number: event.block_number,
        keys,
    })
}

fn transactions_hash(batch: Token) -> Option<ContentKey> {
    match batch.into_tuple()?.into_iter().next()? {
        Token::FixedBytes(bytes) if bytes.len() == 32 => Some(ContentKey::from_slice(&bytes)),
        _ => None,
    }
}
