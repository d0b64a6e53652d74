//! A wrapper around one RPC endpoint which records latency, keeps an offline
//! marker and instruments requests with prometheus metrics. Retries and rate
//! limiting are composed on top by the provider pool and the chain guard.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use derive_new::new;
use ethers_core::types::U64;
use ethers_providers::{Http, HttpClientError, JsonRpcClient};
use ingest_core::rpc_clients::{BlockNumberGetter, PoolMember, RpcEndpoint};
use ingest_core::{ChainCommunicationError, ChainResult};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{categorize_client_error, PrometheusClientMetrics, PrometheusConfig, ProviderHealth};

/// One RPC endpoint plus its health history. Clones share the history.
pub struct InstrumentedProvider<C> {
    inner: C,
    endpoint: RpcEndpoint,
    health: Arc<ProviderHealth>,
    metrics: PrometheusClientMetrics,
    config: PrometheusConfig,
}

impl<C: Clone> Clone for InstrumentedProvider<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            endpoint: self.endpoint.clone(),
            health: self.health.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C> Debug for InstrumentedProvider<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InstrumentedProvider({}, {})",
            self.config.chain_name, self.config.node_host
        )
    }
}

impl<C> InstrumentedProvider<C> {
    /// Wrap `inner`, which talks to `endpoint` on `chain`.
    pub fn new(
        inner: C,
        endpoint: RpcEndpoint,
        chain: impl Into<String>,
        metrics: PrometheusClientMetrics,
    ) -> Self {
        let config = PrometheusConfig::from_endpoint(&endpoint, chain);
        Self {
            inner,
            endpoint,
            health: Default::default(),
            metrics,
            config,
        }
    }

    /// The inner client implementation
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Url of the endpoint
    pub fn url(&self) -> &str {
        self.endpoint.url.as_str()
    }

    /// Host of the endpoint, for logs
    pub fn host(&self) -> &str {
        &self.config.node_host
    }

    /// Chain this provider serves
    pub fn chain_name(&self) -> &str {
        &self.config.chain_name
    }

    /// Shared health history
    pub fn health(&self) -> &ProviderHealth {
        &self.health
    }

    /// When the provider was marked offline
    pub fn offline_since(&self) -> Option<SystemTime> {
        self.health.offline_since()
    }

    /// Latest height this provider reported to a probe
    pub fn last_reported_height(&self) -> Option<u64> {
        self.health.last_reported_height()
    }

    /// Remember a height reported by this provider
    pub fn record_height(&self, height: u64) {
        self.health.record_height(height)
    }

    /// Endpoint settings of this provider
    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    /// Mark the provider offline; the metric only changes on the transition.
    pub fn mark_offline(&self) {
        if self.health.set_offline() {
            self.metrics.set_offline(&self.config, true);
        }
    }

    /// Run `fut` as a request against this endpoint.
    ///
    /// The request is bounded by the endpoint timeout; a timeout is reported
    /// as [`ChainCommunicationError::Timeout`]. Latency is recorded for every
    /// completed request. Success clears the offline marker, errors which
    /// penalize providers set it.
    pub async fn instrument<F, R>(&self, method: &str, fut: F) -> ChainResult<R>
    where
        F: Future<Output = ChainResult<R>> + Send,
    {
        let start = Instant::now();
        let res = match tokio::time::timeout(self.endpoint.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(ChainCommunicationError::Timeout {
                provider: self.config.node_host.clone(),
                timeout: self.endpoint.timeout,
            }),
        };
        self.health.record_latency(start.elapsed());
        match &res {
            Ok(_) => {
                if self.health.set_online() {
                    debug!(chain = %self.config.chain_name, provider = %self.config.node_host, "Provider back online");
                    self.metrics.set_offline(&self.config, false);
                }
            }
            Err(e) if e.penalizes_provider() => {
                warn!(chain = %self.config.chain_name, provider = %self.config.node_host, method, error = %e, "Marking provider offline");
                self.mark_offline();
            }
            Err(_) => {}
        }
        self.metrics
            .increment_metrics(&self.config, method, start, res.is_ok());
        res
    }
}

impl<C> InstrumentedProvider<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    /// Issue a JSON-RPC request.
    pub async fn request<T, R>(&self, method: &str, params: T) -> ChainResult<R>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        self.instrument(method, async {
            self.inner
                .request(method, params)
                .await
                .map_err(|e| {
                    categorize_client_error(&self.endpoint, &self.config.chain_name, method, e)
                })
        })
        .await
    }
}

impl InstrumentedProvider<Http> {
    /// An http JSON-RPC provider for `endpoint`.
    pub fn http(
        endpoint: RpcEndpoint,
        chain: impl Into<String>,
        metrics: PrometheusClientMetrics,
    ) -> ChainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(ChainCommunicationError::from_other)?;
        let http = Http::new_with_client(endpoint.url.clone(), client);
        Ok(Self::new(http, endpoint, chain, metrics))
    }
}

impl<C> PoolMember for InstrumentedProvider<C>
where
    C: Send + Sync,
{
    fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    fn is_offline(&self) -> bool {
        self.health.offline_since().is_some()
    }

    fn set_offline(&self) {
        self.mark_offline()
    }

    fn latency(&self) -> Option<Duration> {
        self.health.latency()
    }
}

impl<C> From<InstrumentedProvider<C>> for JsonRpcBlockGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError> + 'static,
{
    fn from(val: InstrumentedProvider<C>) -> Self {
        JsonRpcBlockGetter::new(val)
    }
}

/// Utility struct for implementing `BlockNumberGetter` on EVM chains
#[derive(Debug, new)]
pub struct JsonRpcBlockGetter<C>(InstrumentedProvider<C>);

/// RPC method for getting the latest block number
pub const BLOCK_NUMBER_RPC: &str = "eth_blockNumber";

#[async_trait]
impl<C> BlockNumberGetter for JsonRpcBlockGetter<C>
where
    C: JsonRpcClient<Error = HttpClientError>,
{
    async fn get_block_number(&self) -> ChainResult<u64> {
        let height = self
            .0
            .request(BLOCK_NUMBER_RPC, ())
            .await
            .map(|r: U64| r.as_u64())?;
        self.0.record_height(height);
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn provider(timeout: Duration) -> InstrumentedProvider<()> {
        let mut endpoint = RpcEndpoint::new(Url::parse("https://rpc.example:8545/key").unwrap());
        endpoint.timeout = timeout;
        InstrumentedProvider::new((), endpoint, "ethereum", Default::default())
    }

    #[tokio::test]
    async fn success_clears_offline_marker() {
        let provider = provider(Duration::from_secs(1));
        provider.set_offline();
        assert!(provider.is_offline());
        let res = provider.instrument("eth_blockNumber", async { Ok(1u64) }).await;
        assert_eq!(res.unwrap(), 1);
        assert!(!provider.is_offline());
        assert!(provider.latency().is_some());
    }

    #[tokio::test]
    async fn parse_failure_marks_offline_but_rpc_error_does_not() {
        let provider = provider(Duration::from_secs(1));
        let _ = provider
            .instrument("eth_getLogs", async {
                Err::<(), _>(ChainCommunicationError::RpcError {
                    provider: "rpc.example:8545".into(),
                    code: -32000,
                    message: "block range too large".into(),
                })
            })
            .await;
        assert!(!provider.is_offline());

        let _ = provider
            .instrument("eth_getLogs", async {
                Err::<(), _>(ChainCommunicationError::parse_failure(
                    "rpc.example:8545",
                    "missing field `logIndex`",
                ))
            })
            .await;
        assert!(provider.is_offline());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out_and_mark_offline() {
        let provider = provider(Duration::from_millis(50));
        let res = provider
            .instrument("eth_blockNumber", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1u64)
            })
            .await;
        assert!(matches!(res, Err(ChainCommunicationError::Timeout { .. })));
        assert!(provider.is_offline());
        assert_eq!(provider.host(), "rpc.example:8545");
    }

    #[tokio::test]
    async fn clones_share_health() {
        let provider = provider(Duration::from_secs(1));
        let clone = provider.clone();
        clone.set_offline();
        assert!(provider.is_offline());
        clone.record_height(42);
        assert_eq!(provider.last_reported_height(), Some(42));
    }
}
