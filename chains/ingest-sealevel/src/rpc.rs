use async_trait::async_trait;
use derive_new::new;
use ethers_prometheus::InstrumentedProvider;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use ingest_core::rpc_clients::BlockNumberGetter;
use ingest_core::{ChainResult, FinalityTag};
use serde::Deserialize;
use serde_json::{json, Value};

/// An instrumented Solana JSON-RPC provider.
pub type SolanaProvider<C = Http> = InstrumentedProvider<C>;

pub(crate) const GET_SLOT: &str = "getSlot";
pub(crate) const GET_BLOCK: &str = "getBlock";
pub(crate) const GET_SIGNATURES_FOR_ADDRESS: &str = "getSignaturesForAddress";
pub(crate) const GET_TRANSACTION: &str = "getTransaction";

/// The slot was skipped, or is missing after a ledger jump to a snapshot
pub const SLOT_SKIPPED: i64 = -32007;
/// The slot was skipped, or is missing in long-term storage
pub const LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;
/// The block is not available yet
pub const BLOCK_NOT_AVAILABLE: i64 = -32004;

/// Solana commitment for a finality tag.
pub fn commitment(finality: FinalityTag) -> &'static str {
    match finality {
        FinalityTag::Latest | FinalityTag::Safe => "confirmed",
        FinalityTag::Finalized => "finalized",
    }
}

pub(crate) fn commitment_config(finality: FinalityTag) -> Value {
    json!({ "commitment": commitment(finality) })
}

/// Header fields of a `getBlock` answer with `transactionDetails: none`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaBlockHeader {
    /// Base58 block hash
    pub blockhash: String,
    /// Unix seconds, unknown for some old blocks
    pub block_time: Option<u64>,
    /// Slot of the parent block
    pub parent_slot: u64,
}

/// One entry of `getSignaturesForAddress`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Base58 transaction signature
    pub signature: String,
    /// Slot the transaction landed in
    pub slot: u64,
    /// Set when the transaction failed
    #[serde(default)]
    pub err: Option<Value>,
    /// Unix seconds
    #[serde(default)]
    pub block_time: Option<u64>,
}

/// Reads the current slot; used by the health check.
#[derive(Debug, new)]
pub struct SolanaSlotGetter<C = Http>(SolanaProvider<C>);

impl<C> From<SolanaProvider<C>> for SolanaSlotGetter<C> {
    fn from(provider: SolanaProvider<C>) -> Self {
        SolanaSlotGetter::new(provider)
    }
}

#[async_trait]
impl<C> BlockNumberGetter for SolanaSlotGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    async fn get_block_number(&self) -> ChainResult<u64> {
        let slot: u64 = self
            .0
            .request(GET_SLOT, [commitment_config(FinalityTag::Latest)])
            .await?;
        self.0.record_height(slot);
        Ok(slot)
    }
}
