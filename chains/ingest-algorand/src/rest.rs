use async_trait::async_trait;
use derive_new::new;
use ethers_prometheus::InstrumentedProvider;
use ingest_core::rpc_clients::BlockNumberGetter;
use ingest_core::ChainResult;
use serde::Deserialize;
use serde_json::Value;

/// An instrumented algod or indexer REST provider.
pub type AlgorandProvider = InstrumentedProvider<reqwest::Client>;

/// `GET /v2/status` of algod
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeStatus {
    /// Last committed round
    pub last_round: u64,
}

/// `GET /v2/blocks/{round}/hash` of algod
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHashResponse {
    /// Base32 block hash
    pub block_hash: String,
}

/// `GET /v2/blocks/{round}?header-only=true` of the indexer
#[derive(Debug, Deserialize)]
pub struct IndexerBlockHeader {
    /// Round number
    pub round: u64,
    /// Unix seconds
    pub timestamp: u64,
}

/// `GET /health` of the indexer
#[derive(Debug, Deserialize)]
pub struct IndexerHealth {
    /// Latest round the indexer has imported
    pub round: u64,
}

/// One page of `GET /v2/transactions` of the indexer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransactionsPage {
    /// Transactions of the page
    #[serde(default)]
    pub transactions: Vec<Value>,
    /// Token of the next page, absent on the last one
    #[serde(default)]
    pub next_token: Option<String>,
}

pub(crate) async fn algod_status(provider: &AlgorandProvider) -> ChainResult<NodeStatus> {
    provider.get_json("algod_status", "v2/status", &[]).await
}

/// Reads the last round from algod; used by the health check.
#[derive(Debug, new)]
pub struct AlgodRoundGetter(AlgorandProvider);

impl From<AlgorandProvider> for AlgodRoundGetter {
    fn from(provider: AlgorandProvider) -> Self {
        AlgodRoundGetter::new(provider)
    }
}

#[async_trait]
impl BlockNumberGetter for AlgodRoundGetter {
    async fn get_block_number(&self) -> ChainResult<u64> {
        let round = algod_status(&self.0).await?.last_round;
        self.0.record_height(round);
        Ok(round)
    }
}

/// Reads the imported round from the indexer; used by the health check.
#[derive(Debug, new)]
pub struct IndexerRoundGetter(AlgorandProvider);

impl From<AlgorandProvider> for IndexerRoundGetter {
    fn from(provider: AlgorandProvider) -> Self {
        IndexerRoundGetter::new(provider)
    }
}

#[async_trait]
impl BlockNumberGetter for IndexerRoundGetter {
    async fn get_block_number(&self) -> ChainResult<u64> {
        let health: IndexerHealth = self.0.get_json("indexer_health", "health", &[]).await?;
        self.0.record_height(health.round);
        Ok(health.round)
    }
}
