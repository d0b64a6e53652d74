use async_trait::async_trait;
use derive_new::new;
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use ingest_core::rpc_clients::BlockNumberGetter;
use ingest_core::utils::deserialize_u64_from_str_or_int;
use ingest_core::ChainResult;
use serde::Deserialize;
use serde_json::Value;

/// An instrumented Sui JSON-RPC provider.
pub type SuiProvider<C = Http> = InstrumentedProvider<C>;

pub(crate) const GET_LATEST_CHECKPOINT: &str = "sui_getLatestCheckpointSequenceNumber";
pub(crate) const GET_CHECKPOINT: &str = "sui_getCheckpoint";
pub(crate) const MULTI_GET_TRANSACTION_BLOCKS: &str = "sui_multiGetTransactionBlocks";

/// The fields of `sui_getCheckpoint` the ingester uses.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiCheckpoint {
    /// Checkpoint number
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub sequence_number: u64,
    /// Checkpoint digest
    pub digest: String,
    /// Unix milliseconds
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub timestamp_ms: u64,
    /// Digests of the transactions in the checkpoint
    #[serde(default)]
    pub transactions: Vec<String>,
}

/// A transaction block with its events, as returned with `showEvents`.
#[derive(Clone, Debug, Deserialize)]
pub struct SuiTransactionBlock {
    /// Transaction digest
    pub digest: String,
    /// Emitted events
    #[serde(default)]
    pub events: Vec<SuiEvent>,
    /// Transaction input, when requested
    #[serde(default)]
    pub transaction: Option<Value>,
}

/// An event emitted by a transaction block.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEvent {
    /// Fully qualified event type, `package::module::Name`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Package which emitted the event
    #[serde(default)]
    pub package_id: Option<String>,
    /// Sender of the transaction
    #[serde(default)]
    pub sender: Option<String>,
}

impl SuiTransactionBlock {
    /// Sender recorded in the transaction input, or in its first event.
    pub fn sender(&self) -> Option<String> {
        self.transaction
            .as_ref()
            .and_then(|tx| tx["data"]["sender"].as_str())
            .map(str::to_owned)
            .or_else(|| self.events.iter().find_map(|e| e.sender.clone()))
    }
}

/// Reads the latest checkpoint; used by the health check.
#[derive(Debug, new)]
pub struct SuiCheckpointGetter<C = Http>(SuiProvider<C>);

impl<C> From<SuiProvider<C>> for SuiCheckpointGetter<C> {
    fn from(provider: SuiProvider<C>) -> Self {
        SuiCheckpointGetter::new(provider)
    }
}

#[async_trait]
impl<C> BlockNumberGetter for SuiCheckpointGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    async fn get_block_number(&self) -> ChainResult<u64> {
        let checkpoint = latest_checkpoint(&self.0).await?;
        self.0.record_height(checkpoint);
        Ok(checkpoint)
    }
}

pub(crate) async fn latest_checkpoint<C>(provider: &SuiProvider<C>) -> ChainResult<u64>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    let checkpoint: String = provider.request(GET_LATEST_CHECKPOINT, ()).await?;
    ingest_core::utils::parse_u64(&checkpoint).ok_or_else(|| {
        ingest_core::ChainCommunicationError::parse_failure(
            provider.host(),
            format!("invalid checkpoint sequence number {checkpoint:?}"),
        )
    })
}
