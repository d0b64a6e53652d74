use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{
    BlockInfo, BlockRange, ChainCommunicationError, ChainIdentity, ChainResult, FinalityTag,
    RawLog, RawTransaction, RecordFilter,
};

/// Read access to one chain, backed by that chain's provider pool.
///
/// Per-block requests are batched up to the chain's batch cap. A batch either
/// parses completely or the call fails; the provider that returned a
/// malformed response is marked offline before the error is returned.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait ChainBlockRepository: Send + Sync + Debug {
    /// The chain this repository reads from
    fn chain(&self) -> &ChainIdentity;

    /// Height of the chain at the given finality.
    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64>;

    /// Fetch headers for `numbers`, keyed by block hash. Numbers the chain
    /// never produced (skipped slots) are left out of the result.
    async fn get_blocks(
        &self,
        numbers: &[u64],
        finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>>;

    /// Logs in `range` matching `filter`.
    async fn get_filtered_logs(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
    ) -> ChainResult<Vec<RawLog>> {
        let _ = (range, filter);
        Err(ChainCommunicationError::unsupported(
            self.chain().name(),
            "get_filtered_logs",
        ))
    }

    /// Transactions in `range` matching `filter`.
    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        let _ = (range, filter, finality);
        Err(ChainCommunicationError::unsupported(
            self.chain().name(),
            "get_transactions",
        ))
    }
}
