use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{Address, Block, BlockNumber, Bytes, Log, H256};
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainIdentity, ChainResult, FinalityTag, RawLog,
    RecordFilter,
};
use itertools::Itertools;
use serde_json::json;
use tracing::{debug, instrument};

use crate::{
    parse_block, parse_log, EvmBlock, EvmProvider, FinalityStrategy, CALL, GET_BLOCK_BY_NUMBER,
    GET_LOGS,
};

/// Providers commonly reject batches larger than this.
pub const DEFAULT_EVM_BATCH_CAP: usize = 9;

/// Map a finality tag to the block tag understood by `eth_getBlockByNumber`.
pub fn block_tag(finality: FinalityTag) -> BlockNumber {
    match finality {
        FinalityTag::Latest => BlockNumber::Latest,
        FinalityTag::Safe => BlockNumber::Safe,
        FinalityTag::Finalized => BlockNumber::Finalized,
    }
}

/// Reads blocks and logs of an EVM chain through its provider pool. Heights
/// are reported at the tag asked for; chain specific finality rules live in
/// [`EvmBlockRepository`].
#[derive(Debug)]
pub struct EthereumBlockRepository<C = Http> {
    chain: ChainIdentity,
    pool: ProviderPool<EvmProvider<C>>,
    batch_cap: usize,
}

impl<C> EthereumBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Create a repository; `batch_cap` defaults to
    /// [`DEFAULT_EVM_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        pool: ProviderPool<EvmProvider<C>>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            pool,
            batch_cap: batch_cap.unwrap_or(DEFAULT_EVM_BATCH_CAP).max(1),
        }
    }

    /// Name of the chain
    pub fn chain_name(&self) -> &str {
        self.chain.name()
    }

    /// The providers of this chain
    pub fn pool(&self) -> &ProviderPool<EvmProvider<C>> {
        &self.pool
    }

    /// Maximum number of block requests served by one provider at once
    pub fn batch_cap(&self) -> usize {
        self.batch_cap
    }

    /// Fetch one block by tag or number.
    pub async fn get_block(&self, block: BlockNumber) -> ChainResult<EvmBlock> {
        self.pool
            .call(move |provider| {
                Box::pin(async move {
                    let res: Option<Block<H256>> = provider
                        .request(GET_BLOCK_BY_NUMBER, (block, false))
                        .await?;
                    parse_block(provider.host(), &format!("{block:?}"), res)
                })
            })
            .await
    }

    /// Height at `finality` as reported by the node itself.
    pub async fn native_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.get_block(block_tag(finality))
            .await
            .map(|block| block.number)
    }


    async fn get_block_chunk(&self, numbers: Vec<u64>) -> ChainResult<Vec<EvmBlock>> {
        self.pool
            .call(move |provider| {
                let numbers = numbers.clone();
                Box::pin(async move {
                    let requests = numbers.iter().map(|&n| {
                        provider.request::<_, Option<Block<H256>>>(
                            GET_BLOCK_BY_NUMBER,
                            (BlockNumber::from(n), false),
                        )
                    });
                    let responses = try_join_all(requests).await?;
                    numbers
                        .iter()
                        .zip(responses)
                        .map(|(n, block)| parse_block(provider.host(), &n.to_string(), block))
                        .collect()
                })
            })
            .await
    }
}

#[async_trait]
impl<C> ChainBlockRepository for EthereumBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.native_block_height(finality).await
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
            for block in self.get_block_chunk(chunk.to_vec()).await? {
                blocks.insert(block.hash.to_ascii_lowercase(), BlockInfo::from(block));
            }
        }
        Ok(blocks)
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, %range))]
    async fn get_filtered_logs(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
    ) -> ChainResult<Vec<RawLog>> {
        let mut params = json!({
            "fromBlock": format!("0x{:x}", range.from()),
            "toBlock": format!("0x{:x}", range.to()),
        });
        if !filter.addresses.is_empty() {
            params["address"] = json!(filter.addresses);
        }
        if !filter.topics.is_empty() {
            params["topics"] = json!([filter.topics]);
        }
        let logs = self
            .pool
            .call(move |provider| {
                let params = params.clone();
                Box::pin(async move {
                    let logs: Vec<Log> = provider.request(GET_LOGS, [params]).await?;
                    logs.into_iter()
                        .filter(|log| log.removed != Some(true))
                        .map(|log| parse_log(provider.host(), log))
                        .collect::<ChainResult<Vec<_>>>()
                })
            })
            .await?;
        debug!(logs = logs.len(), "Fetched logs");
        Ok(logs)
    }
}

/// Read-only contract calls on an EVM chain.
#[async_trait]
pub trait ContractCaller: Send + Sync + std::fmt::Debug {
    /// `eth_call` against `to` at `block`.
    async fn call_contract(
        &self,
        to: Address,
        data: Bytes,
        block: BlockNumber,
    ) -> ChainResult<Bytes>;
}

#[async_trait]
impl<C> ContractCaller for EthereumBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    async fn call_contract(
        &self,
        to: Address,
        data: Bytes,
        block: BlockNumber,
    ) -> ChainResult<Bytes> {
        let tx = json!({ "to": to, "data": data });
        self.pool
            .call(move |provider| {
                let tx = tx.clone();
                Box::pin(async move { provider.request(CALL, (tx, block)).await })
            })
            .await
    }
}

/// An EVM repository whose reported heights follow the chain's finality
/// rules.
#[derive(Debug)]
pub struct EvmBlockRepository<C = Http> {
    base: Arc<EthereumBlockRepository<C>>,
    finality: FinalityStrategy,
}

impl<C> EvmBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Wrap `base` with `finality`.
    pub fn new(base: Arc<EthereumBlockRepository<C>>, finality: FinalityStrategy) -> Self {
        Self { base, finality }
    }

    /// The repository without finality adjustments
    pub fn base(&self) -> &Arc<EthereumBlockRepository<C>> {
        &self.base
    }

    /// The finality rules in use
    pub fn finality(&self) -> &FinalityStrategy {
        &self.finality
    }
}

#[async_trait]
impl<C> ChainBlockRepository for EvmBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        self.base.chain()
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.finality.block_height(&self.base, finality).await
    }

    async fn get_blocks(
        &self,
        numbers: &[u64],
        finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        self.base.get_blocks(numbers, finality).await
    }

    async fn get_filtered_logs(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
    ) -> ChainResult<Vec<RawLog>> {
        self.base.get_filtered_logs(range, filter).await
    }
}
