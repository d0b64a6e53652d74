use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use async_rwlock::RwLock;
use async_trait::async_trait;
use itertools::Itertools;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn, warn_span};

use crate::{ChainCommunicationError, ChainResult};

use super::{filter_outliers, HealthReport, RpcClientError, RpcEndpoint, DEFAULT_OUTLIER_THRESHOLD};

/// Read the current block number from a chain.
#[async_trait]
pub trait BlockNumberGetter: Send + Sync + Debug {
    /// Latest block number getter
    async fn get_block_number(&self) -> ChainResult<u64>;
}

/// A provider that can live in a [`ProviderPool`].
pub trait PoolMember: Send + Sync + Debug {
    /// The endpoint this provider talks to
    fn endpoint(&self) -> &RpcEndpoint;

    /// Whether a call failed since the last successful one
    fn is_offline(&self) -> bool;

    /// Mark the provider offline until its next successful call
    fn set_offline(&self);

    /// Mean latency of recent calls
    fn latency(&self) -> Option<Duration>;
}

/// Providers and the current health ordering.
pub struct PoolProviders<T> {
    /// Providers in configuration order
    pub providers: Vec<T>,
    /// Indices into `providers` of the providers that passed the last health
    /// check, best first
    pub healthy: RwLock<Vec<usize>>,
}

/// The set of RPC providers usable for one chain.
///
/// `get` hands out the best provider of the current health ordering. When
/// every provider is offline it fails open and hands out a random one rather
/// than nothing.
pub struct ProviderPool<T> {
    /// Providers and their ordering
    pub inner: Arc<PoolProviders<T>>,
    chain: String,
    outlier_threshold: u64,
}

impl<T> ProviderPool<T> {
    /// Number of providers in the pool
    pub fn len(&self) -> usize {
        self.inner.providers.len()
    }

    /// Whether the pool has no providers
    pub fn is_empty(&self) -> bool {
        self.inner.providers.is_empty()
    }

    /// Name of the chain served by this pool
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Maximum deviation from the mean height tolerated by `set_providers`
    pub fn outlier_threshold(&self) -> u64 {
        self.outlier_threshold
    }
}

impl<T> Clone for ProviderPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            chain: self.chain.clone(),
            outlier_threshold: self.outlier_threshold,
        }
    }
}

impl<T> Debug for ProviderPool<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPool")
            .field("chain", &self.chain)
            .field(
                "providers",
                &self
                    .inner
                    .providers
                    .iter()
                    .map(|v| format!("{:?}", v))
                    .join(", "),
            )
            .finish()
    }
}

impl<T> ProviderPool<T>
where
    T: PoolMember + Clone,
{
    /// Convenience method for creating a `ProviderPoolBuilder`
    pub fn builder(chain: impl Into<String>) -> ProviderPoolBuilder<T> {
        ProviderPoolBuilder::new(chain)
    }

    /// Create a pool with the default outlier threshold
    pub fn new(chain: impl Into<String>, providers: impl IntoIterator<Item = T>) -> Self {
        Self::builder(chain).add_providers(providers).build()
    }

    /// All providers in configuration order.
    pub fn get_all(&self) -> &[T] {
        &self.inner.providers
    }

    /// Snapshot of the current health ordering
    pub async fn healthy_snapshot(&self) -> Vec<usize> {
        self.inner.healthy.read().await.clone()
    }

    /// The first provider of the health ordering which is not offline; if
    /// there is none, a random provider.
    pub async fn get(&self) -> ChainResult<T> {
        let healthy = self.healthy_snapshot().await;
        if let Some(provider) = healthy
            .iter()
            .map(|&i| &self.inner.providers[i])
            .find(|p| !p.is_offline())
        {
            return Ok(provider.clone());
        }

        let provider = self
            .inner
            .providers
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| ChainCommunicationError::NoProviders(self.chain.clone()))?;
        debug!(
            chain = %self.chain,
            provider = %provider.endpoint().host(),
            "No healthy provider available, using a random one"
        );
        Ok(provider.clone())
    }

    /// Rebuild the health ordering from a fresh batch of probe results.
    ///
    /// Reports are outlier filtered against the mean height, reduced to the
    /// healthy ones and, when `cursor` is given, to providers that are not
    /// behind it. Survivors are ordered by latency, then weight. When nothing
    /// survives the previous ordering is kept. Returns whether the ordering
    /// was replaced.
    pub async fn set_providers(&self, reports: &[HealthReport], cursor: Option<u64>) -> bool {
        let index_by_url: HashMap<&str, usize> = self
            .inner
            .providers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.endpoint().url.as_str(), i))
            .collect();

        let survivors = filter_outliers(reports, self.outlier_threshold)
            .into_iter()
            .filter(|r| r.healthy)
            .filter(|r| match (cursor, r.height) {
                (Some(cursor), Some(height)) => height >= cursor,
                _ => true,
            })
            .filter_map(|r| index_by_url.get(r.url.as_str()).map(|&i| (i, r)))
            .sorted_by(|(ia, a), (ib, b)| {
                let latency_a = a.latency.unwrap_or(Duration::MAX);
                let latency_b = b.latency.unwrap_or(Duration::MAX);
                latency_a.cmp(&latency_b).then_with(|| {
                    self.inner.providers[*ib]
                        .endpoint()
                        .weight
                        .cmp(&self.inner.providers[*ia].endpoint().weight)
                })
            })
            .map(|(i, _)| i)
            .dedup()
            .collect::<Vec<_>>();

        if survivors.is_empty() {
            warn!(
                chain = %self.chain,
                reports = reports.len(),
                "No provider passed the health check, keeping the previous pool ordering"
            );
            return false;
        }

        let mut healthy = self.inner.healthy.write().await;
        if *healthy != survivors {
            info!(
                chain = %self.chain,
                ordering = ?survivors
                    .iter()
                    .map(|&i| self.inner.providers[i].endpoint().host())
                    .collect::<Vec<_>>(),
                "Reordered provider pool"
            );
        }
        *healthy = survivors;
        true
    }

    /// Call `f` with the best provider. Providers failing with a transport,
    /// timeout or parse error are marked offline. Retryable failures are
    /// retried with the next provider as many times as the failing endpoint
    /// allows.
    pub async fn call<V>(
        &self,
        mut f: impl FnMut(T) -> Pin<Box<dyn Future<Output = ChainResult<V>> + Send>>,
    ) -> ChainResult<V> {
        let mut errors = vec![];
        loop {
            let provider = self.get().await?;
            let resp = f(provider.clone()).await;
            let _span = warn_span!(
                "ProviderPool::call",
                chain = %self.chain,
                provider = %provider.endpoint().host(),
                attempt = errors.len()
            )
            .entered();
            match resp {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if e.penalizes_provider() {
                        provider.set_offline();
                    }
                    warn!(error = %e, "Got error from pool provider");
                    let retry = e.is_retryable()
                        && errors.len() < provider.endpoint().retries as usize;
                    errors.push(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(RpcClientError::AllProvidersFailed(errors).into())
        }
    }
}

/// Builder to create a new provider pool.
#[derive(Debug, Clone)]
pub struct ProviderPoolBuilder<T> {
    chain: String,
    providers: Vec<T>,
    outlier_threshold: u64,
}

impl<T> ProviderPoolBuilder<T>
where
    T: PoolMember,
{
    fn new(chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            providers: Vec::new(),
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }

    /// Add a new provider to the set. Each new provider will be a lower
    /// priority than the previous, unless its weight is higher.
    pub fn add_provider(mut self, provider: T) -> Self {
        self.providers.push(provider);
        self
    }

    /// Add many providers sorted by highest priority first.
    pub fn add_providers(mut self, providers: impl IntoIterator<Item = T>) -> Self {
        self.providers.extend(providers);
        self
    }

    /// Maximum deviation from the mean reported height before a provider is
    /// treated as an outlier.
    pub fn outlier_threshold(mut self, threshold: u64) -> Self {
        self.outlier_threshold = threshold;
        self
    }

    /// Create a pool; the initial ordering is by descending weight.
    pub fn build(self) -> ProviderPool<T> {
        let healthy = (0..self.providers.len())
            .sorted_by(|a, b| {
                self.providers[*b]
                    .endpoint()
                    .weight
                    .cmp(&self.providers[*a].endpoint().weight)
            })
            .collect();
        ProviderPool {
            inner: Arc::new(PoolProviders {
                providers: self.providers,
                healthy: RwLock::new(healthy),
            }),
            chain: self.chain,
            outlier_threshold: self.outlier_threshold,
        }
    }
}
