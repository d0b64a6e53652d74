use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainResult, FinalityTag, RawTransaction, RecordFilter,
};
use itertools::Itertools;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::rest::algod_status;
use crate::{AlgorandProvider, BlockHashResponse, IndexerBlockHeader, TransactionsPage};

/// Default number of per-round requests served by one provider at once
pub const DEFAULT_ALGORAND_BATCH_CAP: usize = 10;
/// Page size of indexer transaction searches
pub const TRANSACTIONS_PAGE_LIMIT: u64 = 1_000;

/// Reads rounds and application transactions of Algorand. Rounds are final
/// once committed, so every finality tag reads the last round.
#[derive(Debug)]
pub struct AlgorandBlockRepository {
    chain: ChainIdentity,
    algod: ProviderPool<AlgorandProvider>,
    indexer: ProviderPool<AlgorandProvider>,
    batch_cap: usize,
}

impl AlgorandBlockRepository {
    /// Create a repository over an algod and an indexer pool; `batch_cap`
    /// defaults to [`DEFAULT_ALGORAND_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        algod: ProviderPool<AlgorandProvider>,
        indexer: ProviderPool<AlgorandProvider>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            algod,
            indexer,
            batch_cap: batch_cap.unwrap_or(DEFAULT_ALGORAND_BATCH_CAP).max(1),
        }
    }

    async fn block_hashes(&self, rounds: Vec<u64>) -> ChainResult<Vec<BlockHashResponse>> {
        self.algod
            .call(move |provider| {
                let rounds = rounds.clone();
                Box::pin(async move {
                    try_join_all(rounds.iter().map(|round| block_hash(&provider, *round))).await
                })
            })
            .await
    }

    async fn block_headers(&self, rounds: Vec<u64>) -> ChainResult<Vec<IndexerBlockHeader>> {
        self.indexer
            .call(move |provider| {
                let rounds = rounds.clone();
                Box::pin(async move {
                    try_join_all(rounds.iter().map(|round| block_header(&provider, *round))).await
                })
            })
            .await
    }

    async fn search_transactions(
        &self,
        application: Option<&str>,
        range: BlockRange,
    ) -> ChainResult<Vec<Value>> {
        let mut transactions = vec![];
        let mut next: Option<String> = None;
        loop {
            let query = transactions_query(application, range, next.as_deref());
            let page: TransactionsPage = self
                .indexer
                .call(move |provider| {
                    let query = query.clone();
                    Box::pin(async move {
                        let query = query
                            .iter()
                            .map(|(key, value)| (*key, value.clone()))
                            .collect::<Vec<_>>();
                        provider
                            .get_json("indexer_transactions", "v2/transactions", &query)
                            .await
                    })
                })
                .await?;
            let fetched = page.transactions.len();
            transactions.extend(page.transactions);
            match page.next_token {
                Some(token) if fetched > 0 => next = Some(token),
                _ => break,
            }
        }
        Ok(transactions)
    }
}

async fn block_hash(provider: &AlgorandProvider, round: u64) -> ChainResult<BlockHashResponse> {
    let path = format!("v2/blocks/{round}/hash");
    provider.get_json("algod_block_hash", &path, &[]).await
}

async fn block_header(provider: &AlgorandProvider, round: u64) -> ChainResult<IndexerBlockHeader> {
    let path = format!("v2/blocks/{round}");
    let query = [("header-only", "true".to_owned())];
    provider.get_json("indexer_block", &path, &query).await
}

/// Query of an indexer transaction search over `range`.
pub fn transactions_query(
    application: Option<&str>,
    range: BlockRange,
    next: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("min-round", range.from().to_string()),
        ("max-round", range.to().to_string()),
        ("limit", TRANSACTIONS_PAGE_LIMIT.to_string()),
    ];
    if let Some(application) = application {
        query.push(("application-id", application.to_owned()));
    }
    if let Some(next) = next {
        query.push(("next", next.to_owned()));
    }
    query
}

/// Build a record from an indexer transaction.
pub fn parse_transaction(provider: &str, tx: Value) -> ChainResult<RawTransaction> {
    let hash = tx["id"]
        .as_str()
        .ok_or_else(|| ChainCommunicationError::parse_failure(provider, "transaction without id"))?
        .to_owned();
    let round = tx["confirmed-round"].as_u64().ok_or_else(|| {
        ChainCommunicationError::parse_failure(
            provider,
            format!("transaction {hash} without confirmed-round"),
        )
    })?;
    Ok(RawTransaction {
        block_number: round,
        block_hash: None,
        block_time: tx["round-time"].as_u64(),
        sender: tx["sender"].as_str().map(str::to_owned),
        hash,
        payload: tx,
    })
}

#[async_trait]
impl ChainBlockRepository for AlgorandBlockRepository {
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
        self.algod
            .call(|provider| {
                Box::pin(async move { Ok(algod_status(&provider).await?.last_round) })
            })
            .await
    }

    #[instrument(skip(self, numbers), fields(chain = %self.chain, rounds = numbers.len()))]
    async fn get_blocks(
        &self,
        numbers: &[u64],
        _finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        let rounds = numbers.iter().copied().unique().collect::<Vec<_>>();
        let mut blocks = HashMap::with_capacity(rounds.len());
        for chunk in rounds.chunks(self.batch_cap) {
            let hashes = self.block_hashes(chunk.to_vec()).await?;
            let headers = self.block_headers(chunk.to_vec()).await?;
            for ((round, hash), header) in chunk.iter().zip(hashes).zip(headers) {
                if header.round != *round {
                    return Err(ChainCommunicationError::parse_failure(
                        self.chain.name(),
                        format!("indexer answered round {} for round {round}", header.round),
                    ));
                }
                blocks.insert(
                    hash.block_hash.clone(),
                    BlockInfo {
                        number: *round,
                        hash: hash.block_hash,
                        timestamp: header.timestamp,
                    },
                );
            }
        }
        Ok(blocks)
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, %range))]
    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        _finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        let mut found = vec![];
        if filter.addresses.is_empty() {
            found.extend(self.search_transactions(None, range).await?);
        }
        for application in &filter.addresses {
            found.extend(self.search_transactions(Some(application), range).await?);
        }
        let transactions = found
            .into_iter()
            .map(|tx| parse_transaction(self.chain.name(), tx))
            .collect::<ChainResult<Vec<_>>>()?
            .into_iter()
            .unique_by(|tx| tx.hash.clone())
            .sorted_by_key(|tx| tx.block_number)
            .collect::<Vec<_>>();
        debug!(transactions = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use ethers_prometheus::PrometheusClientMetrics;
    use ingest_core::rpc_clients::{PoolMember, RpcEndpoint};
    use serde_json::json;

    use super::*;
    use crate::{NodeStatus, TransactionsPage};

    fn unreachable_provider() -> AlgorandProvider {
        let endpoint = RpcEndpoint::new("http://127.0.0.1:9/".parse().unwrap());
        AlgorandProvider::rest(endpoint, "algorand", PrometheusClientMetrics::default()).unwrap()
    }

    #[tokio::test]
    async fn per_round_requests_report_transport_failures() {
        let provider = unreachable_provider();
        let err = try_join_all([7u64, 8].iter().map(|round| block_hash(&provider, *round)))
            .await
            .unwrap_err();
        assert!(err.penalizes_provider());
        assert!(provider.is_offline());

        let err = block_header(&provider, 7).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn query_covers_range_and_application() {
        let range = BlockRange::new(100, 200).unwrap();
        let query = transactions_query(Some("842125965"), range, Some("token"));
        assert!(query.contains(&("min-round", "100".to_owned())));
        assert!(query.contains(&("max-round", "200".to_owned())));
        assert!(query.contains(&("application-id", "842125965".to_owned())));
        assert!(query.contains(&("next", "token".to_owned())));
        assert!(!transactions_query(None, range, None)
            .iter()
            .any(|(key, _)| *key == "application-id" || *key == "next"));
    }

    #[test]
    fn parses_indexer_transaction() {
        let tx = json!({
            "id": "TXID",
            "confirmed-round": 35_000_000u64,
            "round-time": 1_700_000_000u64,
            "sender": "SENDER",
            "tx-type": "appl"
        });
        let tx = parse_transaction("mainnet-idx.algonode.cloud", tx).unwrap();
        assert_eq!(tx.hash, "TXID");
        assert_eq!(tx.block_number, 35_000_000);
        assert_eq!(tx.block_time, Some(1_700_000_000));
        assert_eq!(tx.sender.as_deref(), Some("SENDER"));
    }

    #[test]
    fn unconfirmed_transaction_is_a_parse_failure() {
        let err = parse_transaction("idx", json!({ "id": "TXID" })).unwrap_err();
        assert!(err.penalizes_provider());
    }

    #[test]
    fn decodes_rest_bodies() {
        let status: NodeStatus =
            serde_json::from_value(json!({ "last-round": 42, "time-since-last-round": 1 }))
                .unwrap();
        assert_eq!(status.last_round, 42);
        let page: TransactionsPage =
            serde_json::from_value(json!({ "current-round": 50, "transactions": [] })).unwrap();
        assert!(page.next_token.is_none());
    }
}
