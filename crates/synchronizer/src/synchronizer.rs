use crate::metrics::{SYNC_EVENTS, SYNC_KEYS, SYNC_RESUBSCRIPTIONS, SYNC_STATE};
use crate::{
    decode_sequence_batches, CommitteeRegistry, ContentKey, DataResolver, Error, EventWatcher,
    KeyValueStore, L1Client, MemberClient, OffChainData, RawEvent, Result, SynchronizerConfig,
    TransactionalStore, WatchOutcome,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncState {
    Idle = 0,
    ResolvingStartBlock = 1,
    Subscribing = 2,
    Waiting = 3,
    Processing = 4,
    Resubscribing = 5,
    Stopped = 6,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::ResolvingStartBlock => "resolving_start_block",
            SyncState::Subscribing => "subscribing",
            SyncState::Waiting => "waiting",
            SyncState::Processing => "processing",
            SyncState::Resubscribing => "resubscribing",
            SyncState::Stopped => "stopped",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SyncState::Idle),
            1 => Some(SyncState::ResolvingStartBlock),
            2 => Some(SyncState::Subscribing),
            3 => Some(SyncState::Waiting),
            4 => Some(SyncState::Processing),
            5 => Some(SyncState::Resubscribing),
            6 => Some(SyncState::Stopped),
            _ => None,
        }
    }
}

/// Where to resume given the stored progress marker. The last processed block
/// is replayed, since events in it may straddle the marker write.
pub fn start_block_from(last_processed_block: u64) -> u64 {
    last_processed_block.saturating_sub(1)
}

/// Watches for `SequenceBatches` events, checks which of the referenced
/// batches are not stored locally, then retrieves them from the committee and
/// stores them along with the progress marker.
pub struct BatchSynchronizer<C, M, S> {
    config: SynchronizerConfig,
    watcher: EventWatcher<C>,
    committee: Arc<CommitteeRegistry<C>>,
    resolver: DataResolver<C, M>,
    store: TransactionalStore<S>,
    stop: CancellationToken,
}

impl<C, M, S> BatchSynchronizer<C, M, S>
where
    C: L1Client,
    M: MemberClient,
    S: KeyValueStore,
{
    /// Fails if the configuration is invalid or the committee cannot be
    /// resolved.
    pub async fn new(
        config: SynchronizerConfig,
        l1: Arc<C>,
        members: Arc<M>,
        db: Arc<S>,
    ) -> Result<Self> {
        let committee = Arc::new(CommitteeRegistry::new(
            l1.clone(),
            config.self_address,
            config.rpc_timeout,
        ));
        let resolver = DataResolver::new(committee.clone(), members, config.rpc_timeout);
        Self::with_parts(config, l1, committee, resolver, db).await
    }

    pub(crate) async fn with_parts(
        config: SynchronizerConfig,
        l1: Arc<C>,
        committee: Arc<CommitteeRegistry<C>>,
        resolver: DataResolver<C, M>,
        db: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;
        committee.refresh().await?;

        Ok(Self {
            watcher: EventWatcher::new(l1, config.retry_interval, config.subscription_timeout),
            store: TransactionalStore::new(db, config.db_timeout),
            committee,
            resolver,
            stop: CancellationToken::new(),
            config,
        })
    }

    /// Stop when `stop` is cancelled instead of an internal token.
    pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// Token that stops [`start`](Self::start) when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn committee(&self) -> &Arc<CommitteeRegistry<C>> {
        &self.committee
    }

    /// Run the subscription loop until stopped.
    pub async fn start(&self) {
        info!("Starting batch synchronizer");

        'subscription: loop {
            self.set_state(SyncState::ResolvingStartBlock);
            let start = loop {
                match self.start_block().await {
                    Ok(start) => break start,
                    Err(_) if self.pause().await => continue,
                    Err(_) => break 'subscription,
                }
            };

            self.set_state(SyncState::Subscribing);
            let Some(mut subscription) = self.watcher.subscribe(start, &self.stop).await else {
                break;
            };

            loop {
                self.set_state(SyncState::Waiting);
                match self.watcher.next(&mut subscription, &self.stop).await {
                    WatchOutcome::Event(event) => {
                        self.set_state(SyncState::Processing);
                        match self.handle_sequence_batches(&event).await {
                            Ok(()) => SYNC_EVENTS.with_label_values(&["success"]).inc(),
                            Err(Error::Cancelled) => {
                                subscription.unsubscribe();
                                break 'subscription;
                            }
                            Err(err) => {
                                SYNC_EVENTS.with_label_values(&[failure_label(&err)]).inc();
                                SYNC_RESUBSCRIPTIONS.with_label_values(&["batch_failure"]).inc();
                                error!(
                                    "Failed to process batches of block {} (tx {:?}), resubscribing: {err}",
                                    event.block_number, event.tx_hash
                                );
                                self.set_state(SyncState::Resubscribing);
                                subscription.unsubscribe();
                                if !self.pause().await {
                                    break 'subscription;
                                }
                                continue 'subscription;
                            }
                        }
                    }
                    WatchOutcome::SubscriptionError(err) => {
                        SYNC_RESUBSCRIPTIONS.with_label_values(&["subscription_error"]).inc();
                        warn!("Subscription error, resubscribing: {err}");
                        self.set_state(SyncState::Resubscribing);
                        subscription.unsubscribe();
                        continue 'subscription;
                    }
                    WatchOutcome::TimedOut => {
                        info!(
                            "No sequence batch events within {:?} (subscribed from block {})",
                            self.config.subscription_timeout,
                            subscription.start_block()
                        );
                    }
                    WatchOutcome::Stopped => {
                        subscription.unsubscribe();
                        break 'subscription;
                    }
                }
            }
        }

        self.set_state(SyncState::Stopped);
        info!("Batch synchronizer stopped");
    }

    /// Block to subscribe from. On failure the caller decides when to retry;
    /// a fresh node would start from 0.
    pub async fn start_block(&self) -> Result<u64> {
        match self.store.last_processed_block().await {
            Ok(last) => Ok(start_block_from(last)),
            Err(err) => {
                error!("Error retrieving last processed block, starting from 0: {err}");
                Err(err)
            }
        }
    }

    /// Store the data of every batch in `event` that is not stored yet, then
    /// advance the progress marker to the event's block.
    pub async fn handle_sequence_batches(&self, event: &RawEvent) -> Result<()> {
        let batch = decode_sequence_batches(event)?;

        let mut missing: Vec<ContentKey> = Vec::new();
        for key in batch.keys {
            if missing.contains(&key) || self.store.exists(key).await? {
                SYNC_KEYS.with_label_values(&["known"]).inc();
                continue;
            }
            SYNC_KEYS.with_label_values(&["missing"]).inc();
            missing.push(key);
        }

        let data = self.resolve_all(&missing).await?;

        if self.stop.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.store.commit(batch.block_number, data).await?;
        info!(
            "Processed block {} ({} batches resolved)",
            batch.block_number,
            missing.len()
        );
        Ok(())
    }

    // Any key that cannot be resolved fails the whole event, so the marker
    // never moves past a block with missing data.
    async fn resolve_all(&self, keys: &[ContentKey]) -> Result<Vec<OffChainData>> {
        let mut data = Vec::with_capacity(keys.len());
        for key in keys {
            if self.stop.is_cancelled() {
                return Err(Error::Cancelled);
            }
            data.push(self.resolver.resolve(*key).await?);
        }
        Ok(data)
    }

    /// Wait one retry interval. Returns `false` if stopped meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_interval) => true,
        }
    }

    fn set_state(&self, state: SyncState) {
        trace!("Synchronizer state: {}", state.as_str());
        SYNC_STATE.set(state as i64);
    }
}

fn failure_label(err: &Error) -> &'static str {
    if err.is_not_found() {
        "not_found"
    } else if err.is_transient() {
        "transient"
    } else {
        "failure"
    }
}
