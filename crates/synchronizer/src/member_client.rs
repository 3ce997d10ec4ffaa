use crate::{ContentKey, Error, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::Bytes;
use tracing::trace;

const GET_OFF_CHAIN_DATA: &str = "sync_getOffChainData";

/// Point-to-point access to the data served by one committee member.
#[async_trait]
pub trait MemberClient: Send + Sync + 'static {
    /// Fetch the value stored under `key` by the member at `url`. An empty
    /// result means the member does not have it.
    async fn fetch_payload(&self, url: &str, key: ContentKey) -> Result<Bytes>;
}

/// Talks to the JSON-RPC endpoint every committee member exposes.
#[derive(Debug, Default, Clone)]
pub struct JsonRpcMemberClient;

#[async_trait]
impl MemberClient for JsonRpcMemberClient {
    async fn fetch_payload(&self, url: &str, key: ContentKey) -> Result<Bytes> {
        let member_error = |reason: String| Error::Member {
            endpoint: url.to_string(),
            reason,
        };

        let provider = Provider::<Http>::try_from(url).map_err(|err| member_error(err.to_string()))?;
        trace!("Requesting {key:?} from {url}");
        provider
            .request::<_, Bytes>(GET_OFF_CHAIN_DATA, [key])
            .await
            .map_err(|err| member_error(err.to_string()))
    }
}
