//! Periodic probing of every provider of a chain. The probe results reorder
//! the chain's provider pool.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use derive_new::new;
use futures::future::join_all;
use prometheus::{GaugeVec, IntGaugeVec};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use ingest_core::rpc_clients::{
    BlockNumberGetter, HealthReport, PoolMember, ProviderPool, DEFAULT_OUTLIER_THRESHOLD,
};

use crate::CoreMetrics;

/// Default time between two health checks of a chain.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Health check settings of a chain.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HealthCheckConf {
    #[serde(
        default = "default_interval",
        with = "crate::resilience::duration_ms",
        rename = "interval_ms"
    )]
    pub interval: Duration,
    /// Maximum deviation from the mean height, in blocks
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: u64,
}

impl Default for HealthCheckConf {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

fn default_interval() -> Duration {
    DEFAULT_HEALTH_CHECK_INTERVAL
}

fn default_outlier_threshold() -> u64 {
    DEFAULT_OUTLIER_THRESHOLD
}

/// Highest cursor committed by any job of a chain. Providers behind it are
/// of no use to those jobs.
#[derive(Debug, Default)]
pub struct ChainWatermark(AtomicU64);

impl ChainWatermark {
    pub fn observe(&self, cursor: u64) {
        // 0 is the "unset" marker, store cursor + 1
        self.0.fetch_max(cursor.saturating_add(1), Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            v => Some(v - 1),
        }
    }
}

/// Gauges set by the health check.
#[derive(Clone, Debug, new)]
pub struct HealthCheckMetrics {
    latency: GaugeVec,
    height: IntGaugeVec,
}

impl From<&CoreMetrics> for HealthCheckMetrics {
    fn from(metrics: &CoreMetrics) -> Self {
        Self::new(metrics.pool_rpc_latency(), metrics.pool_rpc_height())
    }
}

/// One chain's health check routine.
#[async_trait]
pub trait HealthCheck: Send + Sync + Debug {
    fn chain(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Probe every provider once and apply the results to the pool.
    async fn check(&self) -> Vec<HealthReport>;
}

/// Health check of a [`ProviderPool`]; `B` is the head-height getter built
/// from each pool member.
#[derive(Debug)]
pub struct PoolHealthCheck<T, B> {
    pool: ProviderPool<T>,
    interval: Duration,
    watermark: Arc<ChainWatermark>,
    metrics: Option<HealthCheckMetrics>,
    _getter: PhantomData<fn() -> B>,
}

impl<T, B> PoolHealthCheck<T, B>
where
    T: PoolMember + Clone + Into<B> + 'static,
    B: BlockNumberGetter,
{
    pub fn new(
        pool: ProviderPool<T>,
        interval: Duration,
        watermark: Arc<ChainWatermark>,
        metrics: Option<HealthCheckMetrics>,
    ) -> Self {
        Self {
            pool,
            interval,
            watermark,
            metrics,
            _getter: PhantomData,
        }
    }

    async fn probe(&self, provider: &T) -> HealthReport {
        let url = provider.endpoint().url.to_string();
        let host = provider.endpoint().host();
        let getter: B = provider.clone().into();
        let start = Instant::now();
        match getter.get_block_number().await {
            Ok(height) => {
                let latency = start.elapsed();
                if let Some(metrics) = &self.metrics {
                    let labels = [self.pool.chain(), host.as_str()];
                    metrics
                        .latency
                        .with_label_values(&labels)
                        .set(latency.as_secs_f64());
                    metrics
                        .height
                        .with_label_values(&labels)
                        .set(height.try_into().unwrap_or(i64::MAX));
                }
                debug!(provider = %host, height, ?latency, "Provider probe succeeded");
                HealthReport::healthy(url, height, latency)
            }
            Err(e) => {
                warn!(provider = %host, error = %e, "Provider probe failed");
                HealthReport::unhealthy(url)
            }
        }
    }
}

#[async_trait]
impl<T, B> HealthCheck for PoolHealthCheck<T, B>
where
    T: PoolMember + Clone + Into<B> + 'static,
    B: BlockNumberGetter + 'static,
{
    fn chain(&self) -> &str {
        self.pool.chain()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn check(&self) -> Vec<HealthReport> {
        let reports = join_all(self.pool.get_all().iter().map(|p| self.probe(p))).await;
        self.pool
            .set_providers(&reports, self.watermark.get())
            .await;
        reports
    }
}

/// Run `check` every interval until the task is aborted.
pub fn spawn_health_check(check: Arc<dyn HealthCheck>) -> JoinHandle<()> {
    let span = info_span!("HealthCheck", chain = %check.chain());
    tokio::spawn(
        async move {
            loop {
                let reports = check.check().await;
                let healthy = reports.iter().filter(|r| r.healthy).count();
                debug!(healthy, total = reports.len(), "Health check done");
                tokio::time::sleep(check.interval()).await;
            }
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use ingest_core::rpc_clients::RpcEndpoint;
    use ingest_core::ChainResult;
    use tracing_test::traced_test;
    use url::Url;

    use super::*;

    #[derive(Debug, Clone)]
    struct Provider {
        endpoint: RpcEndpoint,
        height: Option<u64>,
        offline: Arc<AtomicBool>,
    }

    impl Provider {
        fn new(host: &str, height: Option<u64>) -> Self {
            Self {
                endpoint: RpcEndpoint::new(Url::parse(&format!("https://{host}")).unwrap()),
                height,
                offline: Default::default(),
            }
        }
    }

    impl PoolMember for Provider {
        fn endpoint(&self) -> &RpcEndpoint {
            &self.endpoint
        }

        fn is_offline(&self) -> bool {
            self.offline.load(Ordering::Relaxed)
        }

        fn set_offline(&self) {
            self.offline.store(true, Ordering::Relaxed)
        }

        fn latency(&self) -> Option<Duration> {
            None
        }
    }

    #[derive(Debug)]
    struct Getter(Provider);

    impl From<Provider> for Getter {
        fn from(p: Provider) -> Self {
            Getter(p)
        }
    }

    #[async_trait]
    impl BlockNumberGetter for Getter {
        async fn get_block_number(&self) -> ChainResult<u64> {
            self.0.height.ok_or(ingest_core::ChainCommunicationError::Transport {
                provider: self.0.endpoint.host(),
                message: "connection refused".into(),
            })
        }
    }

    fn pool(providers: Vec<Provider>) -> ProviderPool<Provider> {
        ProviderPool::new("ethereum", providers)
    }

    #[tokio::test]
    #[traced_test]
    async fn lagging_and_failing_providers_leave_the_ordering() {
        let pool = pool(vec![
            Provider::new("a.example", Some(100)),
            Provider::new("b.example", Some(101)),
            Provider::new("c.example", Some(100)),
            Provider::new("d.example", Some(50)),
            Provider::new("e.example", None),
        ]);
        let check: PoolHealthCheck<Provider, Getter> = PoolHealthCheck::new(
            pool.clone(),
            Duration::from_secs(60),
            Default::default(),
            None,
        );

        let reports = check.check().await;
        assert_eq!(reports.len(), 5);
        assert_eq!(reports.iter().filter(|r| r.healthy).count(), 4);

        let mut healthy = pool.healthy_snapshot().await;
        healthy.sort();
        assert_eq!(healthy, vec![0, 1, 2]);
        assert!(logs_contain("Provider probe failed"));
    }

    #[tokio::test]
    async fn providers_behind_the_watermark_are_dropped() {
        let pool = pool(vec![
            Provider::new("a.example", Some(100)),
            Provider::new("b.example", Some(103)),
        ]);
        let watermark = Arc::new(ChainWatermark::default());
        watermark.observe(102);
        let check: PoolHealthCheck<Provider, Getter> =
            PoolHealthCheck::new(pool.clone(), Duration::from_secs(60), watermark, None);

        check.check().await;
        assert_eq!(pool.healthy_snapshot().await, vec![1]);
    }

    #[tokio::test]
    async fn all_failing_keeps_previous_ordering() {
        let pool = pool(vec![
            Provider::new("a.example", None),
            Provider::new("b.example", None),
        ]);
        let before = pool.healthy_snapshot().await;
        let check: PoolHealthCheck<Provider, Getter> =
            PoolHealthCheck::new(pool.clone(), Duration::from_secs(60), Default::default(), None);
        check.check().await;
        assert_eq!(pool.healthy_snapshot().await, before);
        assert!(pool.get().await.is_ok());
    }

    #[test]
    fn watermark_only_moves_forward() {
        let watermark = ChainWatermark::default();
        assert_eq!(watermark.get(), None);
        watermark.observe(0);
        assert_eq!(watermark.get(), Some(0));
        watermark.observe(10);
        watermark.observe(5);
        assert_eq!(watermark.get(), Some(10));
    }
}
