use std::time::Duration;

use ethers_core::types::{Block, H256};
use ethers_providers::{HttpClientError, JsonRpcClient};
use ingest_core::{ChainCommunicationError, ChainResult, FinalityTag};
use tracing::{debug, warn};

use crate::{block_tag, parse_block, EthereumBlockRepository, GET_BLOCK_BY_NUMBER};

/// Moonbeam specific RPC telling whether a block hash is finalized
pub const IS_BLOCK_FINALIZED: &str = "moon_isBlockFinalized";
/// Number of `moon_isBlockFinalized` polls before giving up on a block
pub const MOONBEAM_FINALITY_ATTEMPTS: u32 = 10;

/// Delay after the failed poll number `attempt` (zero based).
pub fn finality_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 + 350 * u64::from(attempt))
}

/// Moonbeam finalizes blocks asynchronously: a candidate block is only
/// reported once the node confirms it final.
#[derive(Debug, Clone)]
pub struct MoonbeamFinality {
    attempts: u32,
}

impl Default for MoonbeamFinality {
    fn default() -> Self {
        Self {
            attempts: MOONBEAM_FINALITY_ATTEMPTS,
        }
    }
}

impl MoonbeamFinality {
    pub(crate) async fn block_height<C>(
        &self,
        repo: &EthereumBlockRepository<C>,
        finality: FinalityTag,
    ) -> ChainResult<u64>
    where
        C: JsonRpcClient<Error = HttpClientError> + Clone + 'static,
    {
        let attempts = self.attempts.max(1);
        repo.pool()
            .call(move |provider| {
                Box::pin(async move {
                    let tag = block_tag(finality);
                    let candidate: Option<Block<H256>> = provider
                        .request(GET_BLOCK_BY_NUMBER, (tag, false))
                        .await?;
                    let candidate = parse_block(provider.host(), finality.as_str(), candidate)?;

                    for attempt in 0..attempts {
                        let finalized: bool = provider
                            .request(IS_BLOCK_FINALIZED, [candidate.hash.as_str()])
                            .await?;
                        if finalized {
                            return Ok(candidate.number);
                        }
                        if attempt + 1 < attempts {
                            let backoff = finality_backoff(attempt);
                            debug!(
                                block = candidate.number,
                                attempt,
                                ?backoff,
                                "Moonbeam block not finalized yet"
                            );
                            tokio::time::sleep(backoff).await;
                        }
                    }

                    warn!(
                        provider = %provider.host(),
                        block = candidate.number,
                        attempts,
                        "Moonbeam block never reported finalized"
                    );
                    Err(ChainCommunicationError::Transport {
                        provider: provider.host().to_owned(),
                        message: format!(
                            "block {} not finalized after {attempts} attempts",
                            candidate.hash
                        ),
                    })
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use ingest_core::rpc_clients::PoolMember;
    use ingest_core::KnownChain;
    use serde_json::json;

    use super::*;
    use crate::test_utils::{block_json, repository, MockJsonRpc};
    use crate::FinalityStrategy;

    #[test]
    fn backoff_grows_linearly() {
        assert_eq!(finality_backoff(0), Duration::from_millis(100));
        assert_eq!(finality_backoff(1), Duration::from_millis(450));
        assert_eq!(finality_backoff(9), Duration::from_millis(3_250));
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_finalized() {
        let client = MockJsonRpc::default();
        client
            .respond(GET_BLOCK_BY_NUMBER, block_json(500, 1))
            .respond(IS_BLOCK_FINALIZED, json!(false))
            .respond(IS_BLOCK_FINALIZED, json!(false))
            .respond(IS_BLOCK_FINALIZED, json!(true));
        let repo = repository(KnownChain::Moonbeam, client.clone());
        let strategy = FinalityStrategy::Moonbeam(MoonbeamFinality::default());

        let start = tokio::time::Instant::now();
        let height = strategy
            .block_height(&repo, FinalityTag::Finalized)
            .await
            .unwrap();
        assert_eq!(height, 500);
        assert_eq!(start.elapsed(), Duration::from_millis(100 + 450));
        let polls = client.requests(IS_BLOCK_FINALIZED);
        assert_eq!(polls.len(), 3);
        assert_eq!(polls[0], json!([format!("0x{:064x}", 500)]));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_marks_provider_offline() {
        let client = MockJsonRpc::default();
        client
            .respond(GET_BLOCK_BY_NUMBER, block_json(500, 1))
            .respond(IS_BLOCK_FINALIZED, json!(false));
        let repo = repository(KnownChain::Moonbeam, client.clone());
        let strategy = FinalityStrategy::Moonbeam(MoonbeamFinality::default());

        let err = strategy
            .block_height(&repo, FinalityTag::Finalized)
            .await
            .unwrap_err();
        assert!(err.penalizes_provider());
        assert_eq!(
            client.requests(IS_BLOCK_FINALIZED).len(),
            MOONBEAM_FINALITY_ATTEMPTS as usize
        );
        assert!(repo.pool().get_all()[0].is_offline());
    }
}
