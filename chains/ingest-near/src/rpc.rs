use async_trait::async_trait;
use derive_new::new;
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use ingest_core::rpc_clients::BlockNumberGetter;
use ingest_core::utils::deserialize_u64_from_str_or_int;
use ingest_core::{ChainCommunicationError, ChainResult, FinalityTag};
use serde::Deserialize;
use serde_json::{json, Value};

/// An instrumented Near JSON-RPC provider.
pub type NearProvider<C = Http> = InstrumentedProvider<C>;

pub(crate) const BLOCK: &str = "block";
pub(crate) const CHUNK: &str = "chunk";

/// A `block` answer.
#[derive(Clone, Debug, Deserialize)]
pub struct NearBlock {
    /// Block header
    pub header: NearBlockHeader,
    /// Chunks included in the block
    #[serde(default)]
    pub chunks: Vec<NearChunkHeader>,
}

/// Header fields used by the ingester
#[derive(Clone, Debug, Deserialize)]
pub struct NearBlockHeader {
    /// Block height
    pub height: u64,
    /// Base58 block hash
    pub hash: String,
    /// Unix nanoseconds
    #[serde(deserialize_with = "deserialize_u64_from_str_or_int")]
    pub timestamp: u64,
}

/// Chunk reference inside a block
#[derive(Clone, Debug, Deserialize)]
pub struct NearChunkHeader {
    /// Hash to fetch the chunk by
    pub chunk_hash: String,
}

/// A `chunk` answer.
#[derive(Clone, Debug, Deserialize)]
pub struct NearChunk {
    /// Transactions included in the chunk
    #[serde(default)]
    pub transactions: Vec<Value>,
}

/// `block` params for a finality tag. Near has no `safe` level; it reads as
/// final.
pub fn finality_params(finality: FinalityTag) -> Value {
    match finality {
        FinalityTag::Latest => json!({ "finality": "optimistic" }),
        FinalityTag::Safe | FinalityTag::Finalized => json!({ "finality": "final" }),
    }
}

/// Whether `err` says the block does not exist, as for heights the chain
/// skipped or has not produced yet.
pub fn is_unknown_block(err: &ChainCommunicationError) -> bool {
    matches!(
        err,
        ChainCommunicationError::RpcError { message, .. }
            if message.contains("UNKNOWN_BLOCK") || message.contains("DB Not Found Error")
    )
}

/// Reads the final block height; used by the health check.
#[derive(Debug, new)]
pub struct NearHeightGetter<C = Http>(NearProvider<C>);

impl<C> From<NearProvider<C>> for NearHeightGetter<C> {
    fn from(provider: NearProvider<C>) -> Self {
        NearHeightGetter::new(provider)
    }
}

#[async_trait]
impl<C> BlockNumberGetter for NearHeightGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    async fn get_block_number(&self) -> ChainResult<u64> {
        let block: NearBlock = self
            .0
            .request(BLOCK, finality_params(FinalityTag::Finalized))
            .await?;
        self.0.record_height(block.header.height);
        Ok(block.header.height)
    }
}
