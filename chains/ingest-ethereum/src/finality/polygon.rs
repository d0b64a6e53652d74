use std::sync::Arc;

use ethers_core::types::{Address, BlockNumber, Bytes, H160, U256};
use ethers_providers::{HttpClientError, JsonRpcClient};
use ingest_core::{ChainCommunicationError, ChainResult, FinalityTag};

use crate::{ContractCaller, EthereumBlockRepository};

/// Polygon's root chain contract on Ethereum,
/// `0x86E4Dc95c7FBdBf52e33D563BbDB00823894C287`
pub const POLYGON_ROOT_CHAIN: Address = H160([
    0x86, 0xe4, 0xdc, 0x95, 0xc7, 0xfb, 0xdb, 0xf5, 0x2e, 0x33, 0xd5, 0x63, 0xbb, 0xdb, 0x00, 0x82,
    0x38, 0x94, 0xc2, 0x87,
]);
/// Selector of `getLastChildBlock()`
pub const GET_LAST_CHILD_BLOCK: [u8; 4] = [0xb8, 0x7e, 0x1b, 0x66];

/// Polygon's finalized height is the last child block checkpointed to the
/// root chain contract, read at Ethereum's finalized block.
#[derive(Debug)]
pub struct PolygonFinality {
    ethereum: Arc<dyn ContractCaller>,
    root_chain: Address,
}

impl PolygonFinality {
    /// Read checkpoints from the default root chain contract through
    /// `ethereum`.
    pub fn new(ethereum: Arc<dyn ContractCaller>) -> Self {
        Self::with_root_chain(ethereum, POLYGON_ROOT_CHAIN)
    }

    /// Read checkpoints from `root_chain`.
    pub fn with_root_chain(ethereum: Arc<dyn ContractCaller>, root_chain: Address) -> Self {
        Self {
            ethereum,
            root_chain,
        }
    }

    /// Address of the root chain contract
    pub fn root_chain(&self) -> Address {
        self.root_chain
    }

    pub(crate) async fn block_height<C>(
        &self,
        repo: &EthereumBlockRepository<C>,
        finality: FinalityTag,
    ) -> ChainResult<u64>
    where
        C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
    {
        if finality != FinalityTag::Finalized {
            return repo.native_block_height(finality).await;
        }
        let output = self
            .ethereum
            .call_contract(
                self.root_chain,
                Bytes::from(GET_LAST_CHILD_BLOCK.to_vec()),
                BlockNumber::Finalized,
            )
            .await?;
        decode_last_child_block(&output)
    }
}

/// Decode the `uint256` returned by `getLastChildBlock()`.
pub fn decode_last_child_block(output: &[u8]) -> ChainResult<u64> {
    if output.len() != 32 {
        return Err(ChainCommunicationError::parse_failure(
            "polygon root chain",
            format!("getLastChildBlock returned {} bytes", output.len()),
        ));
    }
    let value = U256::from_big_endian(output);
    if value > U256::from(u64::MAX) {
        return Err(ChainCommunicationError::parse_failure(
            "polygon root chain",
            format!("getLastChildBlock returned {value}, which does not fit a block number"),
        ));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use ingest_core::KnownChain;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{block_json, repository, MockJsonRpc};
    use crate::{FinalityStrategy, CALL, GET_BLOCK_BY_NUMBER};

    #[test]
    fn decodes_uint256_word() {
        let mut word = [0u8; 32];
        word[29..].copy_from_slice(&[0x03, 0x4a, 0x2b]);
        assert_eq!(decode_last_child_block(&word).unwrap(), 0x034a2b);
    }

    #[test]
    fn rejects_short_and_oversized_output() {
        assert!(decode_last_child_block(&[0u8; 4]).is_err());
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(decode_last_child_block(&word).is_err());
    }

    #[tokio::test]
    async fn finalized_height_comes_from_root_chain_on_ethereum() {
        let ethereum_client = MockJsonRpc::default();
        ethereum_client.respond(CALL, json!(format!("0x{:064x}", 54_000_000u64)));
        let ethereum = Arc::new(repository(KnownChain::Ethereum, ethereum_client.clone()));

        let polygon_client = MockJsonRpc::default();
        polygon_client.respond(GET_BLOCK_BY_NUMBER, block_json(54_000_300, 1));
        let polygon = repository(KnownChain::Polygon, polygon_client.clone());

        let strategy = FinalityStrategy::Polygon(PolygonFinality::new(ethereum));
        let finalized = strategy
            .block_height(&polygon, FinalityTag::Finalized)
            .await
            .unwrap();
        assert_eq!(finalized, 54_000_000);
        assert!(polygon_client.requests(GET_BLOCK_BY_NUMBER).is_empty());

        let call = &ethereum_client.requests(CALL)[0];
        assert_eq!(call[0]["data"], "0xb87e1b66");
        assert_eq!(
            call[0]["to"],
            "0x86e4dc95c7fbdbf52e33d563bbdb00823894c287"
        );
        assert_eq!(call[1], "finalized");

        let latest = strategy
            .block_height(&polygon, FinalityTag::Latest)
            .await
            .unwrap();
        assert_eq!(latest, 54_000_300);
    }

    #[tokio::test]
    async fn failed_checkpoint_read_is_not_replaced_by_the_child_chain_head() {
        let ethereum_client = MockJsonRpc::default();
        ethereum_client.fail(CALL, 3, "execution reverted");
        let ethereum = Arc::new(repository(KnownChain::Ethereum, ethereum_client.clone()));

        let polygon_client = MockJsonRpc::default();
        polygon_client.respond(GET_BLOCK_BY_NUMBER, block_json(54_000_300, 1));
        let polygon = repository(KnownChain::Polygon, polygon_client.clone());

        let strategy = FinalityStrategy::Polygon(PolygonFinality::new(ethereum));
        assert!(strategy
            .block_height(&polygon, FinalityTag::Finalized)
            .await
            .is_err());
        assert!(polygon_client.requests(GET_BLOCK_BY_NUMBER).is_empty());
    }
}
