use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_new::new;
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use ingest_core::rpc_clients::BlockNumberGetter;
use ingest_core::utils::deserialize_u64_from_str_or_int;
use ingest_core::{ChainCommunicationError, ChainResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// An instrumented Tendermint JSON-RPC provider.
pub type CosmosProvider<C = Http> = InstrumentedProvider<C>;

pub(crate) const STATUS: &str = "status";
pub(crate) const BLOCK: &str = "block";
pub(crate) const TX_SEARCH: &str = "tx_search";

/// `status` answer, reduced to the sync info.
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    /// Node sync state
    pub sync_info: SyncInfo,
}

/// Sync state reported by `status`.
#[derive(Debug, Deserialize)]
pub struct SyncInfo {
    /// Height of the latest committed block
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub latest_block_height: u64,
    /// Whether the node is still catching up
    #[serde(default)]
    pub catching_up: bool,
}

/// `block` answer.
#[derive(Debug, Deserialize)]
pub struct BlockResponse {
    /// Id of the block
    pub block_id: BlockId,
    /// The block itself
    pub block: TendermintBlock,
}

/// Block id
#[derive(Debug, Deserialize)]
pub struct BlockId {
    /// Upper case hex hash
    pub hash: String,
}

/// Block body, reduced to its header.
#[derive(Debug, Deserialize)]
pub struct TendermintBlock {
    /// Block header
    pub header: BlockHeader,
}

/// Header fields used by the ingester
#[derive(Debug, Deserialize)]
pub struct BlockHeader {
    /// Block height
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub height: u64,
    /// RFC 3339 block time
    pub time: DateTime<Utc>,
}

/// One page of `tx_search`.
#[derive(Debug, Deserialize)]
pub struct TxSearchResponse {
    /// Transactions of the page
    pub txs: Vec<Value>,
    /// Matches over all pages
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub total_count: u64,
}

/// Reads the latest height from `status`; used by the health check.
#[derive(Debug, new)]
pub struct CosmosHeightGetter<C = Http>(CosmosProvider<C>);

impl<C> From<CosmosProvider<C>> for CosmosHeightGetter<C> {
    fn from(provider: CosmosProvider<C>) -> Self {
        CosmosHeightGetter::new(provider)
    }
}

#[async_trait]
impl<C> BlockNumberGetter for CosmosHeightGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    async fn get_block_number(&self) -> ChainResult<u64> {
        let height = latest_height(&self.0).await?;
        self.0.record_height(height);
        Ok(height)
    }
}

pub(crate) async fn latest_height<C>(provider: &CosmosProvider<C>) -> ChainResult<u64>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    let status: StatusResponse = provider.request(STATUS, json!({})).await?;
    if status.sync_info.catching_up {
        return Err(ChainCommunicationError::Transient(format!(
            "{} is catching up at height {}",
            provider.host(),
            status.sync_info.latest_block_height
        )));
    }
    Ok(status.sync_info.latest_block_height)
}
