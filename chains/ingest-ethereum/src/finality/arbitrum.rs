use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::BlockNumber;
use ethers_providers::{HttpClientError, JsonRpcClient};
use ingest_core::{
    ChainBlockRepository, ChainCommunicationError, ChainIdentity, ChainResult, FinalityTag,
    MetadataStore, TypedMetadata,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::EthereumBlockRepository;

/// How often the finalized Ethereum height is refreshed
pub const ARBITRUM_L1_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Pairs kept in the window. At most one pair is kept per L1 block, so this
/// covers far more L1 blocks than Ethereum needs to finalize.
pub const ARBITRUM_WINDOW_CAPACITY: usize = 1_000;

/// An L2 block and the L1 block it was reported against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedL1Block {
    /// Arbitrum block number
    pub l2_block: u64,
    /// Ethereum block number reported as `l1BlockNumber`
    pub l1_block: u64,
}

#[derive(Debug, Default)]
struct ArbitrumState {
    window: Option<Vec<AssociatedL1Block>>,
    finalized_l1: Option<u64>,
    refreshed_at: Option<Instant>,
}

/// Arbitrum blocks are final once the L1 block they were reported against is
/// final on Ethereum. Every height query records the latest L2 block with its
/// L1 block; the finalized height is the newest recorded L2 block whose L1
/// block is finalized.
#[derive(Debug)]
pub struct ArbitrumFinality {
    ethereum: Arc<dyn ChainBlockRepository>,
    window: TypedMetadata<Vec<AssociatedL1Block>>,
    refresh_interval: Duration,
    state: Mutex<ArbitrumState>,
}

impl ArbitrumFinality {
    /// Track `chain` against `ethereum`, persisting the window in `metadata`.
    pub fn new(
        chain: &ChainIdentity,
        ethereum: Arc<dyn ChainBlockRepository>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            ethereum,
            window: TypedMetadata::new(metadata, format!("{}-associated-l1-blocks", chain.name())),
            refresh_interval: ARBITRUM_L1_REFRESH_INTERVAL,
            state: Default::default(),
        }
    }

    /// Override how often the finalized L1 height is refreshed.
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Metadata key of the persisted window
    pub fn window_key(&self) -> &str {
        self.window.key()
    }

    #[instrument(skip_all, fields(chain = %repo.chain_name(), %finality))]
    pub(crate) async fn block_height<C>(
        &self,
        repo: &EthereumBlockRepository<C>,
        finality: FinalityTag,
    ) -> ChainResult<u64>
    where
        C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
    {
        let latest = repo.get_block(BlockNumber::Latest).await?;
        if finality == FinalityTag::Latest {
            return Ok(latest.number);
        }
        let l1_block = latest.l1_block_number.ok_or_else(|| {
            ChainCommunicationError::parse_failure(
                repo.chain_name(),
                format!("block {} has no l1BlockNumber", latest.number),
            )
        })?;

        let mut state = self.state.lock().await;
        let finalized_l1 = self.finalized_l1(&mut state).await?;
        let mut window = match state.window.take() {
            Some(window) => window,
            None => self.window.load().await?.unwrap_or_default(),
        };

        let mut changed = record(&mut window, latest.number, l1_block);
        let (finalized, settled) = settle(&mut window, finalized_l1);
        changed |= settled;
        let stored = if changed {
            self.window.store(&window).await
        } else {
            Ok(())
        };
        state.window = Some(window);
        stored?;

        debug!(
            l2_head = latest.number,
            l1_block,
            finalized_l1,
            ?finalized,
            "Resolved arbitrum finality"
        );
        finalized.ok_or_else(|| {
            ChainCommunicationError::Transient(format!(
                "no recorded {} block is final on L1 block {finalized_l1} yet",
                repo.chain_name()
            ))
        })
    }

    async fn finalized_l1(&self, state: &mut ArbitrumState) -> ChainResult<u64> {
        match (state.finalized_l1, state.refreshed_at) {
            (Some(height), Some(at)) if at.elapsed() < self.refresh_interval => Ok(height),
            _ => {
                let height = self
                    .ethereum
                    .get_block_height(FinalityTag::Finalized)
                    .await?;
                state.finalized_l1 = Some(height);
                state.refreshed_at = Some(Instant::now());
                Ok(height)
            }
        }
    }
}

/// Record that `l2_block` was reported against `l1_block`.
///
/// A newer L2 block on the same L1 block replaces the last pair, keeping one
/// pair per L1 block. A full window makes the newest pair absorb the next
/// one, so the oldest pairs, which are the next to become final, are never
/// evicted.
fn record(window: &mut Vec<AssociatedL1Block>, l2_block: u64, l1_block: u64) -> bool {
    match window.last_mut() {
        Some(last) if last.l2_block >= l2_block => return false,
        // an L1 number that did not advance is final no later than the
        // recorded one
        Some(last) if last.l1_block >= l1_block => {
            last.l2_block = l2_block;
            return true;
        }
        _ => {}
    }
    if window.len() >= ARBITRUM_WINDOW_CAPACITY.max(2) {
        if let Some(last) = window.last_mut() {
            *last = AssociatedL1Block { l2_block, l1_block };
        }
        return true;
    }
    window.push(AssociatedL1Block { l2_block, l1_block });
    true
}

/// The newest L2 block final under `finalized_l1`. Final pairs other than the
/// returned one are dropped; it stays as the anchor for later queries.
fn settle(window: &mut Vec<AssociatedL1Block>, finalized_l1: u64) -> (Option<u64>, bool) {
    let best = window
        .iter()
        .filter(|pair| pair.l1_block <= finalized_l1)
        .max_by_key(|pair| pair.l2_block)
        .copied();
    let Some(best) = best else {
        return (None, false);
    };
    let before = window.len();
    window.retain(|pair| pair.l1_block > finalized_l1 || *pair == best);
    (Some(best.l2_block), window.len() != before)
}

#[cfg(test)]
mod tests {
    use ingest_core::KnownChain;
    use ingest_test::mocks::{MockChainBlockRepository, MockMetadataStore};
    use serde_json::json;

    use super::*;
    use crate::test_utils::{repository, MockJsonRpc};
    use crate::{FinalityStrategy, GET_BLOCK_BY_NUMBER};

    fn arbitrum_block(number: u64, l1_block: u64) -> serde_json::Value {
        json!({
            "number": format!("0x{number:x}"),
            "hash": format!("0x{number:064x}"),
            "parentHash": format!("0x{:064x}", number - 1),
            "timestamp": "0x1",
            "l1BlockNumber": format!("0x{l1_block:x}"),
            "transactions": []
        })
    }

    fn ethereum(finalized: u64) -> Arc<dyn ChainBlockRepository> {
        let mut ethereum = MockChainBlockRepository::new();
        ethereum
            .expect__get_block_height()
            .returning(move |_| Ok(finalized));
        Arc::new(ethereum)
    }

    fn metadata(stored: Option<Vec<AssociatedL1Block>>) -> Arc<dyn MetadataStore> {
        let mut metadata = MockMetadataStore::new();
        let stored = stored.map(|window| serde_json::to_value(window).unwrap());
        metadata
            .expect__get()
            .returning(move |_| Ok(stored.clone()));
        metadata.expect__save().returning(|_, _| Ok(()));
        Arc::new(metadata)
    }

    fn strategy(
        ethereum: Arc<dyn ChainBlockRepository>,
        metadata: Arc<dyn MetadataStore>,
    ) -> FinalityStrategy {
        FinalityStrategy::Arbitrum(ArbitrumFinality::new(
            &KnownChain::Arbitrum.into(),
            ethereum,
            metadata,
        ))
    }

    #[tokio::test]
    async fn reports_recorded_block_not_the_head() {
        let client = MockJsonRpc::default();
        client.respond(GET_BLOCK_BY_NUMBER, arbitrum_block(200, 20));
        let repo = repository(KnownChain::Arbitrum, client);
        let recorded = vec![
            AssociatedL1Block { l2_block: 90, l1_block: 9 },
            AssociatedL1Block { l2_block: 100, l1_block: 10 },
            AssociatedL1Block { l2_block: 150, l1_block: 16 },
        ];
        let strategy = strategy(ethereum(15), metadata(Some(recorded)));

        let height = strategy
            .block_height(&repo, FinalityTag::Finalized)
            .await
            .unwrap();
        assert_eq!(height, 100);
    }

    #[test]
    fn window_is_keyed_by_chain() {
        let finality = ArbitrumFinality::new(
            &KnownChain::Arbitrum.into(),
            Arc::new(MockChainBlockRepository::new()),
            metadata(None),
        );
        assert_eq!(finality.window_key(), "arbitrum-associated-l1-blocks");
    }

    #[tokio::test]
    async fn latest_tag_is_the_head() {
        let client = MockJsonRpc::default();
        client.respond(GET_BLOCK_BY_NUMBER, arbitrum_block(200, 20));
        let repo = repository(KnownChain::Arbitrum, client);
        let strategy = strategy(Arc::new(MockChainBlockRepository::new()), metadata(None));

        let height = strategy
            .block_height(&repo, FinalityTag::Latest)
            .await
            .unwrap();
        assert_eq!(height, 200);
    }

    #[tokio::test]
    async fn no_final_pair_is_transient() {
        let client = MockJsonRpc::default();
        client.respond(GET_BLOCK_BY_NUMBER, arbitrum_block(200, 20));
        let repo = repository(KnownChain::Arbitrum, client);
        let strategy = strategy(ethereum(15), metadata(None));

        let err = strategy
            .block_height(&repo, FinalityTag::Finalized)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainCommunicationError::Transient(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn l1_height_is_refreshed_at_most_every_interval() {
        let client = MockJsonRpc::default();
        client
            .respond(GET_BLOCK_BY_NUMBER, arbitrum_block(100, 10))
            .respond(GET_BLOCK_BY_NUMBER, arbitrum_block(101, 10))
            .respond(GET_BLOCK_BY_NUMBER, arbitrum_block(102, 11));
        let repo = repository(KnownChain::Arbitrum, client);
        let mut ethereum = MockChainBlockRepository::new();
        ethereum
            .expect__get_block_height()
            .times(2)
            .returning(|_| Ok(10));
        let strategy = strategy(Arc::new(ethereum), metadata(None));

        assert_eq!(
            strategy.block_height(&repo, FinalityTag::Finalized).await.unwrap(),
            100
        );
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            strategy.block_height(&repo, FinalityTag::Finalized).await.unwrap(),
            101
        );
        tokio::time::advance(ARBITRUM_L1_REFRESH_INTERVAL).await;
        assert_eq!(
            strategy.block_height(&repo, FinalityTag::Finalized).await.unwrap(),
            101
        );
    }

    #[test]
    fn settled_pairs_leave_the_window() {
        let mut window = vec![];
        for (l2, l1) in [(1, 1), (2, 1), (3, 2), (4, 3)] {
            assert!(record(&mut window, l2, l1));
        }
        assert!(!record(&mut window, 4, 3));
        assert_eq!(
            window,
            vec![
                AssociatedL1Block { l2_block: 2, l1_block: 1 },
                AssociatedL1Block { l2_block: 3, l1_block: 2 },
                AssociatedL1Block { l2_block: 4, l1_block: 3 },
            ]
        );

        assert_eq!(settle(&mut window, 2), (Some(3), true));
        assert_eq!(
            window,
            vec![
                AssociatedL1Block { l2_block: 3, l1_block: 2 },
                AssociatedL1Block { l2_block: 4, l1_block: 3 },
            ]
        );
        assert_eq!(settle(&mut window, 2), (Some(3), false));
        assert_eq!(settle(&mut vec![], 2), (None, false));
    }

    #[test]
    fn full_window_keeps_the_oldest_pairs() {
        let mut window = vec![];
        for l2 in 0..(ARBITRUM_WINDOW_CAPACITY as u64 + 5) {
            record(&mut window, l2, l2);
        }
        assert_eq!(window.len(), ARBITRUM_WINDOW_CAPACITY);
        assert_eq!(window[0].l2_block, 0);
        let last = window[ARBITRUM_WINDOW_CAPACITY - 1];
        assert_eq!(last.l2_block, ARBITRUM_WINDOW_CAPACITY as u64 + 4);
        assert_eq!(settle(&mut window, 3), (Some(3), true));
    }

    #[test]
    fn frequent_polling_still_resolves_finality() {
        // two jobs polling every second, a new L1 block every 12 seconds and
        // Ethereum finalizing 64 blocks behind its head
        const CALLS_PER_L1_BLOCK: u64 = 24;
        const FINALITY_LAG: u64 = 64;
        const FIRST_L1: u64 = 1_000;
        let mut window = vec![];
        let mut last_final = 0;
        for call in 0..7_200u64 {
            let l1_head = FIRST_L1 + call / CALLS_PER_L1_BLOCK;
            record(&mut window, call + 1, l1_head);
            let (finalized, _) = settle(&mut window, l1_head - FINALITY_LAG);

            if l1_head - FINALITY_LAG >= FIRST_L1 {
                let height = finalized.unwrap();
                assert!(height >= last_final);
                last_final = height;
            } else {
                assert_eq!(finalized, None);
            }
            // pending L1 blocks plus the anchor
            assert!(window.len() as u64 <= FINALITY_LAG + 1);
        }
        // every call on the last finalized L1 block has been absorbed
        let finalized_l1 = FIRST_L1 + 7_199 / CALLS_PER_L1_BLOCK - FINALITY_LAG;
        assert_eq!(last_final, (finalized_l1 - FIRST_L1 + 1) * CALLS_PER_L1_BLOCK);
    }
}
