#![allow(non_snake_case)]

use std::collections::HashMap;

use async_trait::async_trait;
use mockall::*;

use ingest_core::*;

mock! {
    pub ChainBlockRepository {
        pub fn _chain(&self) -> &ChainIdentity {}

        pub fn _get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {}

        pub fn _get_blocks(
            &self,
            numbers: Vec<u64>,
            finality: FinalityTag,
        ) -> ChainResult<HashMap<String, BlockInfo>> {}

        pub fn _get_filtered_logs(
            &self,
            range: BlockRange,
            filter: RecordFilter,
        ) -> ChainResult<Vec<RawLog>> {}

        pub fn _get_transactions(
            &self,
            range: BlockRange,
            filter: RecordFilter,
            finality: FinalityTag,
        ) -> ChainResult<Vec<RawTransaction>> {}
    }
}

impl std::fmt::Debug for MockChainBlockRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockChainBlockRepository")
    }
}

#[async_trait]
impl ChainBlockRepository for MockChainBlockRepository {
    fn chain(&self) -> &ChainIdentity {
        self._chain()
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self._get_block_height(finality)
    }

    async fn get_blocks(
        &self,
        numbers: &[u64],
        finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        self._get_blocks(numbers.to_vec(), finality)
    }

    async fn get_filtered_logs(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
    ) -> ChainResult<Vec<RawLog>> {
        self._get_filtered_logs(range, filter.clone())
    }

    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        self._get_transactions(range, filter.clone(), finality)
    }
}
