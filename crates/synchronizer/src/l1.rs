use crate::{CommitteeMember, Error, RawEvent, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::*;

const EVENT_CHANNEL_SIZE: usize = 128;

/// Live feed of sequence batch events. Dropping it releases the subscription.
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

// same as defined in `Supernets2.sol`
#[derive(Clone, Debug, EthEvent)]
pub struct SequenceBatches {
    #[ethevent(indexed)]
    pub num_batch: u64,
}

abigen!(
    DataCommittee,
    r#"[
        function getAmountOfMembers() external view returns (uint256)
        function members(uint256) external view returns (string, address)
    ]"#
);

/// The settlement layer as seen by the synchronizer.
#[async_trait]
pub trait L1Client: Send + Sync + 'static {
    /// Current data committee membership, in on-chain order.
    async fn current_committee(&self) -> Result<Vec<CommitteeMember>>;

    /// Subscribe to `SequenceBatches` events emitted at or after `start_block`.
    async fn watch_sequence_batches(&self, start_block: u64) -> Result<EventStream>;
}

pub struct EthL1Client {
    provider: Arc<Provider<Ws>>,
    supernets2: Address,
    data_committee: DataCommittee<Provider<Ws>>,
}

impl EthL1Client {
    pub async fn connect(
        ws_url: &str,
        supernets2: Address,
        data_committee: Address,
    ) -> Result<Self> {
        let provider = Provider::<Ws>::connect(ws_url)
            .await
            .map_err(|err| Error::Subscription(format!("failed to connect to {ws_url}: {err}")))?;
        let provider = Arc::new(provider);
        info!("Connected to L1 at {ws_url}");

        Ok(Self {
            data_committee: DataCommittee::new(data_committee, provider.clone()),
            provider,
            supernets2,
        })
    }

    fn sequence_batches_filter(&self, start_block: u64) -> Filter {
        Filter::new()
            .address(self.supernets2)
            .topic0(SequenceBatches::signature())
            .from_block(start_block)
    }
}

#[async_trait]
impl L1Client for EthL1Client {
    async fn current_committee(&self) -> Result<Vec<CommitteeMember>> {
        let amount = self
            .data_committee
            .get_amount_of_members()
            .call()
            .await
            .map_err(|err| Error::Committee(err.to_string()))?;

        let mut members = Vec::with_capacity(amount.low_u64() as usize);
        for index in 0..amount.low_u64() {
            let (url, address) = self
                .data_committee
                .members(U256::from(index))
                .call()
                .await
                .map_err(|err| Error::Committee(format!("member {index}: {err}")))?;
            members.push(CommitteeMember { address, url });
        }
        Ok(members)
    }

    async fn watch_sequence_batches(&self, start_block: u64) -> Result<EventStream> {
        let filter = self.sequence_batches_filter(start_block);
        let provider = self.provider.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        tokio::spawn(async move {
            // subscribe before backfilling so nothing emitted in between is lost
            let mut logs = match provider.subscribe_logs(&filter).await {
                Ok(logs) => logs,
                Err(err) => {
                    let _ = ready_tx.send(Err(Error::Subscription(err.to_string())));
                    return;
                }
            };
            let backfill = match provider.get_logs(&filter).await {
                Ok(backfill) => backfill,
                Err(err) => {
                    let _ = ready_tx.send(Err(Error::Subscription(format!(
                        "failed to fetch past sequence batches: {err}"
                    ))));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            let mut backfilled_to = None;
            for log in backfill {
                backfilled_to = log.block_number.map(|n| n.as_u64()).max(backfilled_to);
                if events_tx.send(raw_event(&provider, log).await).await.is_err() {
                    return;
                }
            }
            debug!("Backfilled sequence batches up to {backfilled_to:?}");

            loop {
                tokio::select! {
                    _ = events_tx.closed() => break,
                    log = logs.next() => {
                        let Some(log) = log else {
                            let _ = events_tx
                                .send(Err(Error::Subscription("log subscription closed".into())))
                                .await;
                            break;
                        };
                        let block = log.block_number.map(|n| n.as_u64());
                        if block.is_some() && block <= backfilled_to {
                            trace!("Skipping already backfilled log at block {block:?}");
                            continue;
                        }
                        if events_tx.send(raw_event(&provider, log).await).await.is_err() {
                            break;
                        }
                    }
                }
            }
            // `logs` is dropped here, which unsubscribes on the node
        });

        ready_rx
            .await
            .map_err(|_| Error::Subscription("subscription task exited".into()))??;

        Ok(Box::pin(stream::unfold(events_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }
}

/// Pair a log with the call data of the transaction that emitted it.
async fn raw_event(provider: &Provider<Ws>, log: Log) -> Result<RawEvent> {
    let block_number = log
        .block_number
        .ok_or_else(|| Error::Subscription("log is missing its block number".into()))?
        .as_u64();
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| Error::Subscription("log is missing its transaction hash".into()))?;

    let tx = provider
        .get_transaction(tx_hash)
        .await
        .map_err(|err| Error::Subscription(format!("failed to fetch tx {tx_hash:?}: {err}")))?
        .ok_or_else(|| Error::Subscription(format!("tx {tx_hash:?} not found")))?;

    Ok(RawEvent {
        block_number,
        tx_hash,
        call_data: tx.input,
    })
}
