use crate::metrics::{COMMITTEE_EVICTIONS, COMMITTEE_REFRESHES, COMMITTEE_SIZE};
use crate::{CommitteeMember, Error, L1Client, Result};
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::*;

/// Locally cached view of the data committee, minus ourselves.
///
/// Members are dropped from the cache as soon as they fail to serve a key and
/// only come back with the next [`refresh`](Self::refresh). The cache is
/// therefore always a subset of the on-chain committee at the time of the last
/// refresh.
pub struct CommitteeRegistry<C> {
    client: Arc<C>,
    self_address: Address,
    timeout: Duration,
    members: Mutex<HashMap<Address, CommitteeMember>>,
}

impl<C: L1Client> CommitteeRegistry<C> {
    pub fn new(client: Arc<C>, self_address: Address, timeout: Duration) -> Self {
        Self {
            client,
            self_address,
            timeout,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the cache from the current on-chain membership. The lock is
    /// held for the whole rebuild; the cache is left untouched on failure.
    pub async fn refresh(&self) -> Result<()> {
        let mut members = self.members.lock().await;

        let current = match tokio::time::timeout(self.timeout, self.client.current_committee()).await
        {
            Ok(Ok(current)) => current,
            Ok(Err(err)) => {
                COMMITTEE_REFRESHES.with_label_values(&["failure"]).inc();
                return Err(err);
            }
            Err(_) => {
                COMMITTEE_REFRESHES.with_label_values(&["failure"]).inc();
                return Err(Error::Timeout {
                    operation: "current_committee",
                    after: self.timeout,
                });
            }
        };

        *members = current
            .into_iter()
            .filter(|member| member.address != self.self_address)
            .map(|member| (member.address, member))
            .collect();

        COMMITTEE_REFRESHES.with_label_values(&["success"]).inc();
        COMMITTEE_SIZE.set(members.len() as i64);
        info!("Resolved data committee with {} remote members", members.len());
        Ok(())
    }

    /// Copy of all members currently cached.
    pub async fn snapshot(&self) -> Vec<CommitteeMember> {
        self.members.lock().await.values().cloned().collect()
    }

    /// Drop a member from the cache. Returns whether it was present.
    pub async fn evict(&self, address: &Address) -> bool {
        let mut members = self.members.lock().await;
        let evicted = members.remove(address).is_some();
        if evicted {
            COMMITTEE_EVICTIONS.inc();
            COMMITTEE_SIZE.set(members.len() as i64);
        }
        evicted
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }
}
