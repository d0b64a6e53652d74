use std::collections::HashMap;

use async_trait::async_trait;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use futures::future::try_join_all;
use ingest_core::rpc_clients::ProviderPool;
use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainIdentity, ChainResult, FinalityTag,
    RawTransaction, RecordFilter,
};
use itertools::Itertools;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{
    latest_checkpoint, SuiCheckpoint, SuiProvider, SuiTransactionBlock, GET_CHECKPOINT,
    MULTI_GET_TRANSACTION_BLOCKS,
};

/// Default number of checkpoint requests served by one provider at once
pub const DEFAULT_SUI_BATCH_CAP: usize = 10;
/// `sui_multiGetTransactionBlocks` accepts at most this many digests
pub const MULTI_GET_LIMIT: usize = 50;

/// Reads checkpoints and transaction blocks of Sui. Checkpoints are final
/// once produced, so every finality tag reads the same height.
#[derive(Debug)]
pub struct SuiBlockRepository<C = Http> {
    chain: ChainIdentity,
    pool: ProviderPool<SuiProvider<C>>,
    batch_cap: usize,
}

impl<C> SuiBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    /// Create a repository; `batch_cap` defaults to [`DEFAULT_SUI_BATCH_CAP`].
    pub fn new(
        chain: ChainIdentity,
        pool: ProviderPool<SuiProvider<C>>,
        batch_cap: Option<usize>,
    ) -> Self {
        Self {
            chain,
            pool,
            batch_cap: batch_cap.unwrap_or(DEFAULT_SUI_BATCH_CAP).max(1),
        }
    }

    /// Fetch checkpoints in chunks of the batch cap.
    pub async fn get_checkpoints(&self, numbers: &[u64]) -> ChainResult<Vec<SuiCheckpoint>> {
        let numbers = numbers.iter().copied().unique().collect::<Vec<_>>();
        let mut checkpoints = Vec::with_capacity(numbers.len());
        for chunk in numbers.chunks(self.batch_cap) {
            let chunk = chunk.to_vec();
            let fetched = self
                .pool
                .call(move |provider| {
                    let chunk = chunk.clone();
                    Box::pin(async move {
                        try_join_all(chunk.iter().map(|n| {
                            provider.request::<_, SuiCheckpoint>(GET_CHECKPOINT, [n.to_string()])
                        }))
                        .await
                    })
                })
                .await?;
            checkpoints.extend(fetched);
        }
        Ok(checkpoints)
    }

    async fn get_transaction_blocks(
        &self,
        digests: Vec<String>,
    ) -> ChainResult<Vec<SuiTransactionBlock>> {
        self.pool
            .call(move |provider| {
                let params = json!([
                    digests,
                    { "showEvents": true, "showInput": true }
                ]);
                Box::pin(async move { provider.request(MULTI_GET_TRANSACTION_BLOCKS, params).await })
            })
            .await
    }
}

/// Whether any event of `tx` has a type or package listed in the filter. An
/// empty filter matches every transaction.
pub fn matches_filter(tx: &SuiTransactionBlock, filter: &RecordFilter) -> bool {
    filter.addresses.is_empty()
        || tx.events.iter().any(|event| {
            filter.addresses.iter().any(|wanted| {
                event.event_type.starts_with(wanted.as_str())
                    || event
                        .package_id
                        .as_deref()
                        .is_some_and(|package| package.eq_ignore_ascii_case(wanted))
            })
        })
}

fn into_record(tx: SuiTransactionBlock, checkpoint: &SuiCheckpoint) -> RawTransaction {
    let sender = tx.sender();
    let payload = json!({
        "digest": tx.digest,
        "transaction": tx.transaction,
        "events": tx
            .events
            .iter()
            .map(|event| json!({ "type": event.event_type, "packageId": event.package_id }))
            .collect::<Vec<Value>>(),
    });
    RawTransaction {
        hash: tx.digest,
        block_number: checkpoint.sequence_number,
        block_hash: Some(checkpoint.digest.clone()),
        block_time: Some(checkpoint.timestamp_ms / 1_000),
        sender,
        payload,
    }
}

#[async_trait]
impl<C> ChainBlockRepository for SuiBlockRepository<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
{
    fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    async fn get_block_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
        self.pool
            .call(|provider| Box::pin(async move { latest_checkpoint(&provider).await }))
            .await
    }

    async fn get_blocks(
        &self,
        numbers: &[u64],
        _finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        Ok(self
            .get_checkpoints(numbers)
            .await?
            .into_iter()
            .map(|checkpoint| {
                (
                    checkpoint.digest.clone(),
                    BlockInfo {
                        number: checkpoint.sequence_number,
                        hash: checkpoint.digest,
                        timestamp: checkpoint.timestamp_ms / 1_000,
                    },
                )
            })
            .collect())
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, %range))]
    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        _finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        let checkpoints = self
            .get_checkpoints(&range.iter().collect::<Vec<_>>())
            .await?;
        let mut transactions = vec![];
        for checkpoint in checkpoints.iter().sorted_by_key(|c| c.sequence_number) {
            for digests in checkpoint.transactions.chunks(MULTI_GET_LIMIT) {
                let blocks = self.get_transaction_blocks(digests.to_vec()).await?;
                transactions.extend(
                    blocks
                        .into_iter()
                        .filter(|tx| matches_filter(tx, filter))
                        .map(|tx| into_record(tx, checkpoint)),
                );
            }
        }
        debug!(transactions = transactions.len(), "Fetched transactions");
        Ok(transactions)
    }
}
