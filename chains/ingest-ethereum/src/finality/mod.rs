use ethers_providers::{HttpClientError, JsonRpcClient};
use ingest_core::{ChainIdentity, ChainResult, FinalityTag, KnownChain};

use crate::EthereumBlockRepository;

pub use self::{arbitrum::*, moonbeam::*, polygon::*};

mod arbitrum;
mod moonbeam;
mod polygon;

/// Blocks subtracted from the BSC head in place of a finality tag.
pub const BSC_SAFETY_MARGIN: u64 = 15;

/// How the height of an EVM chain at a given finality is determined.
#[derive(Debug)]
pub enum FinalityStrategy {
    /// The node's own block tags
    Native,
    /// Latest height minus a fixed number of blocks, whatever the tag
    SafetyMargin(u64),
    /// Candidate blocks are confirmed with `moon_isBlockFinalized`
    Moonbeam(MoonbeamFinality),
    /// Finalized height checkpointed on Ethereum
    Polygon(PolygonFinality),
    /// L2 blocks are final once their L1 block is final on Ethereum
    Arbitrum(ArbitrumFinality),
}

impl FinalityStrategy {
    /// Height of `repo`'s chain at `finality`.
    pub async fn block_height<C>(
        &self,
        repo: &EthereumBlockRepository<C>,
        finality: FinalityTag,
    ) -> ChainResult<u64>
    where
        C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
    {
        match self {
            FinalityStrategy::Native => repo.native_block_height(finality).await,
            FinalityStrategy::SafetyMargin(margin) => Ok(repo
                .native_block_height(FinalityTag::Latest)
                .await?
                .saturating_sub(*margin)),
            FinalityStrategy::Moonbeam(moonbeam) => moonbeam.block_height(repo, finality).await,
            FinalityStrategy::Polygon(polygon) => polygon.block_height(repo, finality).await,
            FinalityStrategy::Arbitrum(arbitrum) => arbitrum.block_height(repo, finality).await,
        }
    }
}

/// Default safety margin of chains without usable finality tags.
pub fn default_safety_margin(chain: &ChainIdentity) -> Option<u64> {
    chain
        .is_known(KnownChain::Bsc)
        .then_some(BSC_SAFETY_MARGIN)
}

#[cfg(test)]
mod tests {
    use ingest_core::ChainBlockRepository;

    use super::*;
    use crate::test_utils::{block_json, repository, MockJsonRpc};
    use crate::GET_BLOCK_BY_NUMBER;

    #[tokio::test]
    async fn bsc_subtracts_margin_regardless_of_tag() {
        let client = MockJsonRpc::default();
        client.respond(GET_BLOCK_BY_NUMBER, block_json(1_000, 1));
        let repo = repository(KnownChain::Bsc, client.clone());
        let margin = default_safety_margin(repo.chain()).unwrap();
        let strategy = FinalityStrategy::SafetyMargin(margin);

        for tag in [FinalityTag::Latest, FinalityTag::Finalized] {
            assert_eq!(strategy.block_height(&repo, tag).await.unwrap(), 985);
        }
        assert!(client
            .requests(GET_BLOCK_BY_NUMBER)
            .iter()
            .all(|params| params[0] == "latest"));
    }

    #[tokio::test]
    async fn margin_never_underflows() {
        let client = MockJsonRpc::default();
        client.respond(GET_BLOCK_BY_NUMBER, block_json(3, 1));
        let repo = repository(KnownChain::Bsc, client);
        let height = FinalityStrategy::SafetyMargin(BSC_SAFETY_MARGIN)
            .block_height(&repo, FinalityTag::Latest)
            .await
            .unwrap();
        assert_eq!(height, 0);
    }

    #[test]
    fn only_bsc_has_a_default_margin() {
        assert_eq!(
            default_safety_margin(&KnownChain::Bsc.into()),
            Some(BSC_SAFETY_MARGIN)
        );
        assert_eq!(default_safety_margin(&KnownChain::Ethereum.into()), None);
    }
}
