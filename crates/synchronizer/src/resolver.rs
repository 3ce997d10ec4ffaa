use crate::metrics::{MEMBER_FETCHES, RESOLUTION_DURATION};
use crate::{
    CommitteeMember, CommitteeRegistry, ContentKey, Error, L1Client, MemberClient, OffChainData,
    Result,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::*;

/// Resolves missing batch data from the committee, one member at a time.
pub struct DataResolver<C, M> {
    committee: Arc<CommitteeRegistry<C>>,
    client: Arc<M>,
    rpc_timeout: Duration,
    rng: Mutex<StdRng>,
}

impl<C: L1Client, M: MemberClient> DataResolver<C, M> {
    pub fn new(committee: Arc<CommitteeRegistry<C>>, client: Arc<M>, rpc_timeout: Duration) -> Self {
        Self::with_rng(committee, client, rpc_timeout, StdRng::from_entropy())
    }

    pub fn with_rng(
        committee: Arc<CommitteeRegistry<C>>,
        client: Arc<M>,
        rpc_timeout: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            committee,
            client,
            rpc_timeout,
            rng: Mutex::new(rng),
        }
    }

    /// Query the cached committee in random order until a member returns data
    /// hashing to `key`. Every member that fails is evicted from the cache;
    /// an empty cache is refreshed from L1 first.
    pub async fn resolve(&self, key: ContentKey) -> Result<OffChainData> {
        let _timer = RESOLUTION_DURATION.start_timer();

        if self.committee.is_empty().await {
            info!("Committee cache is empty, refreshing before resolving {key:?}");
            self.committee.refresh().await?;
        }

        let mut members = self.committee.snapshot().await;
        members.shuffle(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));

        for member in members {
            match self.resolve_with_member(key, &member).await {
                Ok(data) => {
                    MEMBER_FETCHES.with_label_values(&["success"]).inc();
                    debug!("Resolved {key:?} from {:?}", member.address);
                    return Ok(data);
                }
                Err(err) => {
                    MEMBER_FETCHES.with_label_values(&[failure_label(&err)]).inc();
                    warn!(
                        "Resolve member {:?} failed, removing from local committee cache: {err}",
                        member.address
                    );
                    self.committee.evict(&member.address).await;
                }
            }
        }

        Err(Error::NotFound(key))
    }

    async fn resolve_with_member(
        &self,
        key: ContentKey,
        member: &CommitteeMember,
    ) -> Result<OffChainData> {
        let value = tokio::time::timeout(self.rpc_timeout, self.client.fetch_payload(&member.url, key))
            .await
            .map_err(|_| Error::Timeout {
                operation: "fetch_payload",
                after: self.rpc_timeout,
            })??;

        if value.is_empty() {
            return Err(Error::Member {
                endpoint: member.url.clone(),
                reason: "data not found".into(),
            });
        }

        let data = OffChainData::new(key, value);
        if !data.is_valid() {
            return Err(Error::PayloadMismatch {
                key,
                actual: data.content_hash(),
            });
        }
        Ok(data)
    }
}

fn failure_label(err: &Error) -> &'static str {
    match err {
        Error::Timeout { .. } => "timeout",
        Error::PayloadMismatch { .. } => "mismatch",
        _ => "failure",
    }
}
