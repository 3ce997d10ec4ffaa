use crate::{Error, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime settings of the batch synchronizer. Read once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Address of this committee member; never queried for data.
    pub self_address: Address,

    /// Delay between failed subscription (or start block) attempts
    pub retry_interval: Duration,

    /// How long to wait for an event before logging that the subscription is idle
    pub subscription_timeout: Duration,

    /// Bound on a single member query or committee lookup
    pub rpc_timeout: Duration,

    /// Bound on a single storage operation
    pub db_timeout: Duration,
}

impl SynchronizerConfig {
    pub fn new(self_address: Address) -> Self {
        Self {
            self_address,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            subscription_timeout: DEFAULT_SUBSCRIPTION_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            db_timeout: DEFAULT_DB_TIMEOUT,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_subscription_timeout(mut self, subscription_timeout: Duration) -> Self {
        self.subscription_timeout = subscription_timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn with_db_timeout(mut self, db_timeout: Duration) -> Self {
        self.db_timeout = db_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("retry_interval", self.retry_interval),
            ("subscription_timeout", self.subscription_timeout),
            ("rpc_timeout", self.rpc_timeout),
            ("db_timeout", self.db_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}
