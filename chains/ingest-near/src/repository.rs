use std::collections::HashMap;

use async_trait::async_trait;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainResult, FinalityTag, RawTransaction, RecordFilter,
};
use itertools::Itertools;
use serde_json::json;
use tracing::{debug, instrument, trace};

use crate::{
    finality_params, is_unknown_block, NearBlock, NearChunk, NearProvider, BLOCK, CHUNK,
};

/// Default number of block or chunk requests served by one provider at once
pub const DEFAULT_NEAR_BATCH_CAP: usize = 10;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Reads blocks and transactions of Near.
#[derive(Debug)]
pub struct NearBlockRepository<C = Http> {
    chain: ChainIdentity,
    pool: ProviderPool<NearProvider<C>>,
    batch_cap: usize,
}

impl<C> NearBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Create a repository; `batch_cap` defaults to [`DEFAULT_NEAR_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        pool: ProviderPool<NearProvider<C>>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            pool,
            batch_cap: batch_cap.unwrap_or(DEFAULT_NEAR_BATCH_CAP).max(1),
        }
    }

    /// Blocks at `heights`; heights without a block are left out.
    pub async fn fetch_blocks(&self, heights: &[u64]) -> ChainResult<Vec<NearBlock>> {
        let heights = heights.iter().copied().unique().collect::<Vec<_>>();
        let mut blocks = Vec::with_capacity(heights.len());
        for chunk in heights.chunks(self.batch_cap) {
            let chunk = chunk.to_vec();
            let fetched = self
                .pool
                .call(move |provider| {
                    let chunk = chunk.clone();
                    Box::pin(async move {
                        let requests = chunk.iter().map(|&height| {
                            let provider = &provider;
                            async move {
                                match provider
                                    .request::<_, NearBlock>(BLOCK, json!({ "block_id": height }))
                                    .await
                                {
                                    Ok(block) => Ok(Some(block)),
                                    Err(e) if is_unknown_block(&e) => {
                                        trace!(height, "No block at height");
                                        Ok(None)
                                    }
                                    Err(e) => Err(e),
                                }
                            }
                        });
                        try_join_all(requests).await
                    })
                })
                .await?;
            blocks.extend(fetched.into_iter().flatten());
        }
        Ok(blocks)
    }

    async fn fetch_chunks(&self, hashes: Vec<String>) -> ChainResult<Vec<NearChunk>> {
        let mut chunks = Vec::with_capacity(hashes.len());
        for batch in hashes.chunks(self.batch_cap) {
            let batch = batch.to_vec();
            let fetched = self
                .pool
                .call(move |provider| {
                    let batch = batch.clone();
                    Box::pin(async move {
                        try_join_all(batch.iter().map(|hash| {
                            provider.request::<_, NearChunk>(CHUNK, json!({ "chunk_id": hash }))
                        }))
                        .await
                    })
                })
                .await?;
            chunks.extend(fetched);
        }
        Ok(chunks)
    }
}

fn block_info(block: &NearBlock) -> BlockInfo {
    BlockInfo {
        number: block.header.height,
        hash: block.header.hash.clone(),
        timestamp: block.header.timestamp / NANOS_PER_SECOND,
    }
}

#[async_trait]
impl<C> ChainBlockRepository for NearBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.pool
            .call(move |provider| {
                Box::pin(async move {
                    match provider
                        .request::<_, NearBlock>(BLOCK, finality_params(finality))
                        .await
                    {
                        Ok(block) => Ok(block.header.height),
                        Err(e) if is_unknown_block(&e) => {
                            Err(ChainCommunicationError::Transient(e.to_string()))
                        }
                        Err(e) => Err(e),
                    }
                })
            })
            .await
    }

    async fn get_blocks(
        &self,
        numbers: &[u64],
        _finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        Ok(self
            .fetch_blocks(numbers)
            .await?
            .iter()
            .map(|block| (block.header.hash.clone(), block_info(block)))
            .collect())
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, %range))]
    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        _finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        let blocks = self
            .fetch_blocks(&range.iter().collect::<Vec<_>>())
            .await?;
        let mut transactions = vec![];
        for block in blocks.iter().sorted_by_key(|b| b.header.height) {
            let info = block_info(block);
            let hashes = block.chunks.iter().map(|c| c.chunk_hash.clone()).collect();
            for chunk in self.fetch_chunks(hashes).await? {
                transactions.extend(
                    chunk
                        .transactions
                        .into_iter()
                        .filter(|tx| {
                            tx["receiver_id"]
                                .as_str()
                                .is_some_and(|receiver| filter.matches_address(receiver))
                        })
                        .filter_map(|tx| {
                            let hash = tx["hash"].as_str()?.to_owned();
                            Some(RawTransaction {
                                hash,
                                block_number: info.number,
                                block_hash: Some(info.hash.clone()),
                                block_time: Some(info.timestamp),
                                sender: tx["signer_id"].as_str().map(str::to_owned),
                                payload: tx,
                            })
                        }),
                );
            }
        }
        debug!(transactions = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }
}
