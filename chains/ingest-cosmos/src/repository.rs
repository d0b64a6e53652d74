use std::collections::HashMap;

use async_trait::async_trait;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::utils::parse_u64;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainResult, FinalityTag, RawTransaction, RecordFilter,
};
use itertools::Itertools;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{latest_height, BlockResponse, CosmosProvider, TxSearchResponse, BLOCK, TX_SEARCH};

/// Default number of block requests served by one provider at once
pub const DEFAULT_COSMOS_BATCH_CAP: usize = 10;
/// Page size of `tx_search`
pub const TX_SEARCH_PAGE_SIZE: u64 = 100;

/// Reads blocks and contract transactions of a Cosmos-SDK chain. Tendermint
/// blocks are final once committed, so every finality tag reads the latest
/// height.
#[derive(Debug)]
pub struct CosmosBlockRepository<C = Http> {
    chain: ChainIdentity,
    pool: ProviderPool<CosmosProvider<C>>,
    batch_cap: usize,
}

impl<C> CosmosBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Create a repository; `batch_cap` defaults to
    /// [`DEFAULT_COSMOS_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        pool: ProviderPool<CosmosProvider<C>>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            pool,
            batch_cap: batch_cap.unwrap_or(DEFAULT_COSMOS_BATCH_CAP).max(1),
        }
    }

    /// Every transaction matching `query`, following pages until
    /// `total_count` is reached.
    async fn search_all(&self, query: String) -> ChainResult<Vec<Value>> {
        let mut txs = vec![];
        let mut page = 1u64;
        loop {
            let params = json!({
                "query": query,
                "prove": false,
                "page": page.to_string(),
                "per_page": TX_SEARCH_PAGE_SIZE.to_string(),
                "order_by": "asc",
            });
            let response: TxSearchResponse = self
                .pool
                .call(move |provider| {
                    let params = params.clone();
                    Box::pin(async move { provider.request(TX_SEARCH, params).await })
                })
                .await?;
            let fetched = response.txs.len();
            txs.extend(response.txs);
            if fetched == 0 || txs.len() as u64 >= response.total_count {
                break;
            }
            page += 1;
        }
        Ok(txs)
    }
}

/// `tx_search` queries for `range`, one per contract address.
pub fn tx_search_queries(range: BlockRange, filter: &RecordFilter) -> Vec<String> {
    let heights = format!("tx.height>={} AND tx.height<={}", range.from(), range.to());
    if filter.addresses.is_empty() {
        return vec![heights];
    }
    filter
        .addresses
        .iter()
        .map(|address| format!("{heights} AND wasm._contract_address='{address}'"))
        .collect()
}

/// Build a record from a `tx_search` entry.
pub fn parse_tx(provider: &str, tx: Value) -> ChainResult<RawTransaction> {
    let hash = tx["hash"]
        .as_str()
        .ok_or_else(|| ChainCommunicationError::parse_failure(provider, "tx without hash"))?
        .to_owned();
    let height = match &tx["height"] {
        Value::String(height) => parse_u64(height),
        height => height.as_u64(),
    }
    .ok_or_else(|| {
        ChainCommunicationError::parse_failure(provider, format!("tx {hash} without height"))
    })?;
    Ok(RawTransaction {
        hash,
        block_number: height,
        block_hash: None,
        block_time: None,
        sender: None,
        payload: tx,
    })
}

#[async_trait]
impl<C> ChainBlockRepository for CosmosBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
        self.pool
            .call(|provider| Box::pin(async move { latest_height(&provider).await }))
            .await
    }

    #[instrument(skip(self, numbers), fields(chain = %self.chain, blocks = numbers.len()))]
    async fn get_blocks(
        &self,
        numbers: &[u64],
        _finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        let numbers = numbers.iter().copied().unique().collect::<Vec<_>>();
        let mut blocks = HashMap::with_capacity(numbers.len());
        for chunk in numbers.chunks(self.batch_cap) {
            let chunk = chunk.to_vec();
            let fetched = self
                .pool
                .call(move |provider| {
                    let chunk = chunk.clone();
                    Box::pin(async move {
                        let responses = try_join_all(chunk.iter().map(|height| {
                            provider.request::<_, BlockResponse>(
                                BLOCK,
                                json!({ "height": height.to_string() }),
                            )
                        }))
                        .await?;
                        responses
                            .into_iter()
                            .map(|response| {
                                let timestamp = u64::try_from(response.block.header.time.timestamp())
                                    .map_err(|_| {
                                        ChainCommunicationError::parse_failure(
                                            provider.host(),
                                            format!(
                                                "block {} has a time before the epoch",
                                                response.block.header.height
                                            ),
                                        )
                                    })?;
                                Ok(BlockInfo {
                                    number: response.block.header.height,
                                    hash: response.block_id.hash,
                                    timestamp,
                                })
                            })
                            .collect::<ChainResult<Vec<_>>>()
                    })
                })
                .await?;
            blocks.extend(fetched.into_iter().map(|block| (block.hash.clone(), block)));
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
        let mut txs = vec![];
        for query in tx_search_queries(range, filter) {
            txs.extend(self.search_all(query).await?);
        }
        let provider = self.chain.name().to_owned();
        let transactions = txs
            .into_iter()
            .map(|tx| parse_tx(&provider, tx))
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
    use ingest_core::KnownChain;
    use ingest_test::mocks::{mock_provider, MockJsonRpc};

    use super::*;
    use crate::STATUS;

    fn repository(client: MockJsonRpc) -> CosmosBlockRepository<MockJsonRpc> {
        let chain = ChainIdentity::from(KnownChain::Osmosis);
        let pool = ProviderPool::new(chain.name(), [mock_provider("https://rpc.osmosis.zone", client)]);
        CosmosBlockRepository::new(chain, pool, None)
    }

    #[tokio::test]
    async fn catching_up_node_is_transient() {
        let client = MockJsonRpc::default();
        client.respond(
            STATUS,
            json!({ "sync_info": { "latest_block_height": "100", "catching_up": true } }),
        );
        let repo = repository(client);
        let err = repo.get_block_height(FinalityTag::Latest).await.unwrap_err();
        assert!(matches!(err, ChainCommunicationError::Transient(_)));
    }

    #[tokio::test]
    async fn blocks_are_keyed_by_hash() {
        let client = MockJsonRpc::default();
        client.respond(
            BLOCK,
            json!({
                "block_id": { "hash": "A1B2" },
                "block": { "header": { "height": "12", "time": "2024-03-01T12:00:00.123456789Z" } }
            }),
        );
        let repo = repository(client.clone());

        let blocks = repo.get_blocks(&[12], FinalityTag::Latest).await.unwrap();
        assert_eq!(blocks["A1B2"].number, 12);
        assert_eq!(blocks["A1B2"].timestamp, 1_709_294_400);
        assert_eq!(client.requests(BLOCK)[0], json!({ "height": "12" }));
    }

    #[tokio::test]
    async fn tx_search_follows_pages() {
        let client = MockJsonRpc::default();
        let page = |start: u64, len: u64| {
            (start..start + len)
                .map(|i| json!({ "hash": format!("H{i}"), "height": (10 + i % 3).to_string() }))
                .collect::<Vec<_>>()
        };
        client
            .respond(TX_SEARCH, json!({ "txs": page(0, 100), "total_count": "130" }))
            .respond(TX_SEARCH, json!({ "txs": page(100, 30), "total_count": "130" }));
        let repo = repository(client.clone());
        let filter = RecordFilter {
            addresses: vec!["osmo1contract".into()],
            topics: vec![],
        };

        let txs = repo
            .get_transactions(BlockRange::new(10, 12).unwrap(), &filter, FinalityTag::Latest)
            .await
            .unwrap();
        assert_eq!(txs.len(), 130);
        assert!(txs.windows(2).all(|w| w[0].block_number <= w[1].block_number));

        let requests = client.requests(TX_SEARCH);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["page"], "2");
        assert_eq!(
            requests[0]["query"],
            "tx.height>=10 AND tx.height<=12 AND wasm._contract_address='osmo1contract'"
        );
    }

    #[test]
    fn one_query_per_contract() {
        let range = BlockRange::new(1, 2).unwrap();
        assert_eq!(tx_search_queries(range, &RecordFilter::default()).len(), 1);
        let filter = RecordFilter {
            addresses: vec!["a".into(), "b".into()],
            topics: vec![],
        };
        assert_eq!(tx_search_queries(range, &filter).len(), 2);
    }
}
