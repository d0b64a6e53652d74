use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use ethers_core::types::{Address, BlockNumber, Bytes};
use prometheus::{IntCounterVec, IntGaugeVec};
use tracing::{info, warn};

use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainResult, FinalityTag, RawLog, RawTransaction, RecordFilter,
};

use ingest_ethereum::ContractCaller;

use super::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::CoreMetrics;

/// Metrics updated by a [`ChainGuard`].
#[derive(Clone, Debug, new)]
pub struct ChainGuardMetrics {
    rate_limited: IntCounterVec,
    circuit_breaker_open: IntGaugeVec,
}

impl From<&CoreMetrics> for ChainGuardMetrics {
    fn from(metrics: &CoreMetrics) -> Self {
        Self::new(metrics.rate_limited(), metrics.circuit_breaker_open())
    }
}

/// The rate limiter and circuit breaker of one chain. Shared by every job
/// polling that chain.
#[derive(Debug)]
pub struct ChainGuard {
    chain: String,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    metrics: Option<ChainGuardMetrics>,
}

impl ChainGuard {
    pub fn new(
        chain: impl Into<String>,
        rate_limit: RateLimiterConfig,
        circuit_breaker: CircuitBreakerConfig,
        metrics: Option<ChainGuardMetrics>,
    ) -> Self {
        Self {
            chain: chain.into(),
            limiter: RateLimiter::new(rate_limit),
            breaker: CircuitBreaker::new(circuit_breaker),
            metrics,
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `call` unless the breaker is open or the limiter is exhausted, then
    /// feed its outcome to the breaker. `call` is not polled when rejected.
    /// Dropping the returned future mid-call records no outcome.
    pub async fn run<T, F>(&self, operation: &str, call: F) -> ChainResult<T>
    where
        F: Future<Output = ChainResult<T>>,
    {
        let permit = self
            .breaker
            .permit()
            .map_err(|retry_after| ChainCommunicationError::CircuitOpen {
                chain: self.chain.clone(),
                retry_after,
            })?;
        if let Err(retry_after) = self.limiter.try_acquire() {
            if let Some(metrics) = &self.metrics {
                metrics.rate_limited.with_label_values(&[&self.chain]).inc();
            }
            return Err(ChainCommunicationError::RateLimited {
                chain: self.chain.clone(),
                retry_after,
            });
        }

        let res = call.await;
        match &res {
            Ok(_) => {
                if permit.success() {
                    info!(chain = %self.chain, operation, "Circuit breaker closed");
                    self.set_open_gauge(false);
                }
            }
            Err(e) if e.counts_as_failure() => {
                if permit.failure() {
                    warn!(chain = %self.chain, operation, error = %e, "Circuit breaker opened");
                    self.set_open_gauge(true);
                }
            }
            Err(_) => drop(permit),
        }
        res
    }

    fn set_open_gauge(&self, open: bool) {
        if let Some(metrics) = &self.metrics {
            metrics
                .circuit_breaker_open
                .with_label_values(&[&self.chain])
                .set(open as i64);
        }
    }
}

/// A repository whose every call goes through the chain's [`ChainGuard`].
#[derive(Debug, Clone)]
pub struct ResilientRepository {
    inner: Arc<dyn ChainBlockRepository>,
    guard: Arc<ChainGuard>,
}

impl ResilientRepository {
    pub fn new(inner: Arc<dyn ChainBlockRepository>, guard: Arc<ChainGuard>) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &Arc<ChainGuard> {
        &self.guard
    }

    pub fn inner(&self) -> &Arc<dyn ChainBlockRepository> {
        &self.inner
    }
}

#[async_trait]
impl ChainBlockRepository for ResilientRepository {
    fn chain(&self) -> &ChainIdentity {
        self.inner.chain()
    }

    async fn get_block_height(&self, finality: FinalityTag) -> ChainResult<u64> {
        self.guard
            .run("get_block_height", self.inner.get_block_height(finality))
            .await
    }

    async fn get_blocks(
        &self,
        numbers: &[u64],
        finality: FinalityTag,
    ) -> ChainResult<HashMap<String, BlockInfo>> {
        self.guard
            .run("get_blocks", self.inner.get_blocks(numbers, finality))
            .await
    }

    async fn get_filtered_logs(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
    ) -> ChainResult<Vec<RawLog>> {
        self.guard
            .run("get_filtered_logs", self.inner.get_filtered_logs(range, filter))
            .await
    }

    async fn get_transactions(
        &self,
        range: BlockRange,
        filter: &RecordFilter,
        finality: FinalityTag,
    ) -> ChainResult<Vec<RawTransaction>> {
        self.guard
            .run(
                "get_transactions",
                self.inner.get_transactions(range, filter, finality),
            )
            .await
    }
}

/// Contract calls of a chain behind the chain's [`ChainGuard`], sharing its
/// budget with the chain's repository.
#[derive(Debug, new)]
pub struct ResilientContractCaller {
    inner: Arc<dyn ContractCaller>,
    guard: Arc<ChainGuard>,
}

#[async_trait]
impl ContractCaller for ResilientContractCaller {
    async fn call_contract(
        &self,
        to: Address,
        data: Bytes,
        block: BlockNumber,
    ) -> ChainResult<Bytes> {
        self.guard
            .run("call_contract", self.inner.call_contract(to, data, block))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use ingest_core::KnownChain;
    use ingest_test::mocks::MockChainBlockRepository;

    use super::*;
    use crate::resilience::CircuitState;

    fn guard(limit: u32, failure_threshold: u32) -> Arc<ChainGuard> {
        Arc::new(ChainGuard::new(
            "ethereum",
            RateLimiterConfig {
                limit,
                period: Duration::from_millis(1000),
            },
            CircuitBreakerConfig {
                failure_threshold,
                interval: Duration::from_secs(60),
                cooldown: Duration::from_secs(30),
            },
            None,
        ))
    }

    fn ethereum() -> ChainIdentity {
        KnownChain::Ethereum.into()
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_call_never_reaches_inner() {
        let mut mock = MockChainBlockRepository::new();
        mock.expect__chain().return_const(ethereum());
        mock.expect__get_block_height()
            .times(1)
            .returning(|_| Ok(100));
        let repo = ResilientRepository::new(Arc::new(mock), guard(1, 5));

        assert_eq!(repo.get_block_height(FinalityTag::Latest).await.unwrap(), 100);
        let err = repo
            .get_block_height(FinalityTag::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainCommunicationError::RateLimited { .. }));
        assert!(err
            .retry_after()
            .is_some_and(|d| d > Duration::ZERO && d <= Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_for_every_operation() {
        let mut mock = MockChainBlockRepository::new();
        mock.expect__chain().return_const(ethereum());
        mock.expect__get_filtered_logs().times(2).returning(|_, _| {
            Err(ChainCommunicationError::Transport {
                provider: "rpc.example".into(),
                message: "connection reset".into(),
            })
        });
        let repo = ResilientRepository::new(Arc::new(mock), guard(100, 2));
        let range = BlockRange::new(1, 10).unwrap();
        let filter = RecordFilter::default();

        for _ in 0..2 {
            assert!(matches!(
                repo.get_filtered_logs(range, &filter).await,
                Err(ChainCommunicationError::Transport { .. })
            ));
        }
        assert!(matches!(
            repo.get_filtered_logs(range, &filter).await,
            Err(ChainCommunicationError::CircuitOpen { .. })
        ));
        assert!(matches!(
            repo.get_block_height(FinalityTag::Finalized).await,
            Err(ChainCommunicationError::CircuitOpen { .. })
        ));
        assert!(matches!(
            repo.get_blocks(&[1], FinalityTag::Latest).await,
            Err(ChainCommunicationError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_cooldown_closes_breaker() {
        let mut mock = MockChainBlockRepository::new();
        mock.expect__chain().return_const(ethereum());
        let mut calls = 0;
        mock.expect__get_block_height().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ChainCommunicationError::Timeout {
                    provider: "rpc.example".into(),
                    timeout: Duration::from_secs(5),
                })
            } else {
                Ok(7)
            }
        });
        let guard = guard(100, 1);
        let repo = ResilientRepository::new(Arc::new(mock), guard.clone());

        assert!(repo.get_block_height(FinalityTag::Latest).await.is_err());
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(repo.get_block_height(FinalityTag::Latest).await.unwrap(), 7);
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_do_not_open_breaker() {
        let mut mock = MockChainBlockRepository::new();
        mock.expect__chain().return_const(ethereum());
        mock.expect__get_blocks()
            .times(3)
            .returning(|_, _| Err(ChainCommunicationError::Transient("skipped slot".into())));
        let guard = guard(100, 1);
        let repo = ResilientRepository::new(Arc::new(mock), guard.clone());

        for _ in 0..3 {
            assert!(matches!(
                repo.get_blocks(&[5], FinalityTag::Latest).await,
                Err(ChainCommunicationError::Transient(_))
            ));
        }
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_half_open_call_does_not_wedge_the_breaker() {
        let guard = guard(100, 1);
        let failed = guard
            .run("get_block_height", async {
                Err::<u64, _>(ChainCommunicationError::Transport {
                    provider: "rpc.example".into(),
                    message: "connection reset".into(),
                })
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            guard.run("get_block_height", std::future::pending::<ChainResult<u64>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(guard.breaker().state(), CircuitState::HalfOpen);

        let height = guard.run("get_block_height", async { Ok(9u64) }).await;
        assert_eq!(height.unwrap(), 9);
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }

    #[derive(Debug, Default)]
    struct CountingCaller(AtomicUsize);

    #[async_trait]
    impl ContractCaller for CountingCaller {
        async fn call_contract(
            &self,
            _to: Address,
            _data: Bytes,
            _block: BlockNumber,
        ) -> ChainResult<Bytes> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(vec![0u8; 32]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn contract_calls_share_the_chain_budget() {
        let mut mock = MockChainBlockRepository::new();
        mock.expect__chain().return_const(ethereum());
        mock.expect__get_block_height()
            .times(1)
            .returning(|_| Ok(100));
        let guard = guard(1, 5);
        let repo = ResilientRepository::new(Arc::new(mock), guard.clone());
        let inner = Arc::new(CountingCaller::default());
        let contracts = ResilientContractCaller::new(inner.clone(), guard);

        repo.get_block_height(FinalityTag::Latest).await.unwrap();
        let err = contracts
            .call_contract(Address::zero(), Bytes::default(), BlockNumber::Finalized)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainCommunicationError::RateLimited { .. }));
        assert_eq!(inner.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_stops_contract_calls() {
        let guard = guard(100, 1);
        let _ = guard
            .run("get_blocks", async {
                Err::<(), _>(ChainCommunicationError::Transport {
                    provider: "rpc.example".into(),
                    message: "connection reset".into(),
                })
            })
            .await;
        let inner = Arc::new(CountingCaller::default());
        let contracts = ResilientContractCaller::new(inner.clone(), guard);

        let err = contracts
            .call_contract(Address::zero(), Bytes::default(), BlockNumber::Finalized)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainCommunicationError::CircuitOpen { .. }));
        assert_eq!(inner.0.load(Ordering::SeqCst), 0);
    }
}
