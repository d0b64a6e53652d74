//! Assembly of every configured chain: provider pools, the repository with
//! its finality quirks, the rate limiter and circuit breaker, and the health
//! checks reordering the pools.

use std::collections::BTreeMap;
use std::sync::Arc;

use ethers_providers::Http;
use eyre::{eyre, Context, Result};
use tracing::info;

use ethers_prometheus::{InstrumentedProvider, JsonRpcBlockGetter, PrometheusClientMetrics};
use ingest_algorand::{AlgodRoundGetter, AlgorandBlockRepository, IndexerRoundGetter};
use ingest_core::rpc_clients::{BlockNumberGetter, PoolMember, ProviderPool, RpcEndpoint};
use ingest_core::{ChainBlockRepository, ChainProtocol, ChainResult, KnownChain, MetadataStore};
use ingest_cosmos::{CosmosBlockRepository, CosmosHeightGetter};
use ingest_ethereum::{
    default_safety_margin, ArbitrumFinality, ContractCaller, EthereumBlockRepository,
    EvmBlockRepository, FinalityStrategy, MoonbeamFinality, PolygonFinality,
};
use ingest_near::{NearBlockRepository, NearHeightGetter};
use ingest_sealevel::{SealevelBlockRepository, SolanaSlotGetter};
use ingest_sui::{SuiBlockRepository, SuiCheckpointGetter};

use crate::resilience::{
    ChainGuard, ChainGuardMetrics, ResilientContractCaller, ResilientRepository,
};
use crate::settings::{ChainConf, Settings};
use crate::{ChainWatermark, CoreMetrics, HealthCheck, HealthCheckMetrics, PoolHealthCheck};

/// Everything the jobs of one chain share.
#[derive(Debug)]
pub struct ChainResources {
    pub conf: ChainConf,
    /// The chain's repository behind its [`ChainGuard`]
    pub repository: Arc<dyn ChainBlockRepository>,
    pub guard: Arc<ChainGuard>,
    /// Highest cursor committed by the chain's jobs
    pub watermark: Arc<ChainWatermark>,
    /// One per provider pool of the chain
    pub health_checks: Vec<Arc<dyn HealthCheck>>,
}

/// Builds [`ChainResources`] for a set of chain settings.
#[derive(Debug)]
pub struct ChainBuilder<'a> {
    metrics: &'a CoreMetrics,
    client_metrics: PrometheusClientMetrics,
    metadata: Arc<dyn MetadataStore>,
    ethereum: Option<EthereumHandles>,
}

#[derive(Debug, Clone)]
struct EthereumHandles {
    contracts: Arc<dyn ContractCaller>,
    resilient: Arc<dyn ChainBlockRepository>,
}

/// Build the resources of every chain with RPC endpoints. Ethereum is built
/// first since Polygon and Arbitrum read their finality from it.
pub fn build_chains(
    settings: &Settings,
    metrics: &CoreMetrics,
    metadata: Arc<dyn MetadataStore>,
) -> Result<BTreeMap<String, ChainResources>> {
    let mut builder = ChainBuilder::new(metrics, metadata)?;
    let (ethereum, others): (Vec<_>, Vec<_>) = settings
        .chains
        .iter()
        .filter(|(_, conf)| !conf.rpcs.is_empty())
        .partition(|(_, conf)| conf.identity.is_known(KnownChain::Ethereum));

    let mut chains = BTreeMap::new();
    for (name, conf) in ethereum.into_iter().chain(others) {
        let resources = builder
            .build(conf)
            .with_context(|| format!("Failed to build chain `{name}`"))?;
        info!(
            chain = %name,
            protocol = %conf.protocol(),
            providers = conf.rpcs.len(),
            "Chain ready"
        );
        chains.insert(name.clone(), resources);
    }
    Ok(chains)
}

fn http_provider(
    endpoint: RpcEndpoint,
    chain: String,
    metrics: PrometheusClientMetrics,
) -> ChainResult<InstrumentedProvider<Http>> {
    InstrumentedProvider::http(endpoint, chain, metrics)
}

fn rest_provider(
    endpoint: RpcEndpoint,
    chain: String,
    metrics: PrometheusClientMetrics,
) -> ChainResult<InstrumentedProvider<reqwest::Client>> {
    InstrumentedProvider::rest(endpoint, chain, metrics)
}

impl<'a> ChainBuilder<'a> {
    pub fn new(metrics: &'a CoreMetrics, metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        Ok(Self {
            metrics,
            client_metrics: metrics.client_metrics()?,
            metadata,
            ethereum: None,
        })
    }

    /// Build one chain.
    pub fn build(&mut self, conf: &ChainConf) -> Result<ChainResources> {
        let watermark = Arc::new(ChainWatermark::default());
        let guard = Arc::new(ChainGuard::new(
            conf.name(),
            conf.rate_limit.clone(),
            conf.circuit_breaker.clone(),
            Some(ChainGuardMetrics::from(self.metrics)),
        ));
        let mut health_checks = vec![];
        let mut evm_base = None;

        let inner: Arc<dyn ChainBlockRepository> = match conf.protocol() {
            ChainProtocol::Evm => {
                let pool = self.pool(conf, &conf.rpcs, http_provider)?;
                health_checks.push(self.health_check::<_, JsonRpcBlockGetter<_>>(
                    conf,
                    pool.clone(),
                    &watermark,
                ));
                let base = Arc::new(EthereumBlockRepository::new(
                    conf.identity.clone(),
                    pool,
                    conf.batch_size,
                ));
                let finality = self.finality_strategy(conf)?;
                evm_base = Some(base.clone());
                Arc::new(EvmBlockRepository::new(base, finality))
            }
            ChainProtocol::Solana => {
                let pool = self.pool(conf, &conf.rpcs, http_provider)?;
                health_checks.push(self.health_check::<_, SolanaSlotGetter>(
                    conf,
                    pool.clone(),
                    &watermark,
                ));
                Arc::new(SealevelBlockRepository::new(
                    conf.identity.clone(),
                    pool,
                    conf.batch_size,
                ))
            }
            ChainProtocol::Sui => {
                let pool = self.pool(conf, &conf.rpcs, http_provider)?;
                health_checks.push(self.health_check::<_, SuiCheckpointGetter>(
                    conf,
                    pool.clone(),
                    &watermark,
                ));
                Arc::new(SuiBlockRepository::new(
                    conf.identity.clone(),
                    pool,
                    conf.batch_size,
                ))
            }
            ChainProtocol::Cosmos => {
                let pool = self.pool(conf, &conf.rpcs, http_provider)?;
                health_checks.push(self.health_check::<_, CosmosHeightGetter>(
                    conf,
                    pool.clone(),
                    &watermark,
                ));
                Arc::new(CosmosBlockRepository::new(
                    conf.identity.clone(),
                    pool,
                    conf.batch_size,
                ))
            }
            ChainProtocol::Near => {
                let pool = self.pool(conf, &conf.rpcs, http_provider)?;
                health_checks.push(self.health_check::<_, NearHeightGetter>(
                    conf,
                    pool.clone(),
                    &watermark,
                ));
                Arc::new(NearBlockRepository::new(
                    conf.identity.clone(),
                    pool,
                    conf.batch_size,
                ))
            }
            ChainProtocol::Algorand => {
                let algod = self.pool(conf, &conf.rpcs, rest_provider)?;
                let indexer = self.pool(conf, &conf.indexer_rpcs, rest_provider)?;
                health_checks.push(self.health_check::<_, AlgodRoundGetter>(
                    conf,
                    algod.clone(),
                    &watermark,
                ));
                health_checks.push(self.health_check::<_, IndexerRoundGetter>(
                    conf,
                    indexer.clone(),
                    &watermark,
                ));
                Arc::new(AlgorandBlockRepository::new(
                    conf.identity.clone(),
                    algod,
                    indexer,
                    conf.batch_size,
                ))
            }
        };

        let repository: Arc<dyn ChainBlockRepository> =
            Arc::new(ResilientRepository::new(inner, guard.clone()));
        if let (true, Some(base)) = (conf.identity.is_known(KnownChain::Ethereum), evm_base) {
            self.ethereum = Some(EthereumHandles {
                contracts: Arc::new(ResilientContractCaller::new(base, guard.clone())),
                resilient: repository.clone(),
            });
        }

        Ok(ChainResources {
            conf: conf.clone(),
            repository,
            guard,
            watermark,
            health_checks,
        })
    }

    fn pool<T>(
        &self,
        conf: &ChainConf,
        endpoints: &[RpcEndpoint],
        connect: impl Fn(RpcEndpoint, String, PrometheusClientMetrics) -> ChainResult<T>,
    ) -> Result<ProviderPool<T>>
    where
        T: PoolMember + Clone,
    {
        let providers = endpoints
            .iter()
            .map(|endpoint| {
                connect(
                    endpoint.clone(),
                    conf.name().to_owned(),
                    self.client_metrics.clone(),
                )
            })
            .collect::<ChainResult<Vec<_>>>()?;
        Ok(ProviderPool::builder(conf.name())
            .add_providers(providers)
            .outlier_threshold(conf.health_check.outlier_threshold)
            .build())
    }

    fn health_check<T, B>(
        &self,
        conf: &ChainConf,
        pool: ProviderPool<T>,
        watermark: &Arc<ChainWatermark>,
    ) -> Arc<dyn HealthCheck>
    where
        T: PoolMember + Clone + Into<B> + 'static,
        B: BlockNumberGetter + 'static,
    {
        Arc::new(PoolHealthCheck::<T, B>::new(
            pool,
            conf.health_check.interval,
            watermark.clone(),
            Some(HealthCheckMetrics::from(self.metrics)),
        ))
    }

    fn finality_strategy(&self, conf: &ChainConf) -> Result<FinalityStrategy> {
        let identity = &conf.identity;
        if let Some(margin) = conf
            .finality_safety_margin
            .or_else(|| default_safety_margin(identity))
        {
            return Ok(FinalityStrategy::SafetyMargin(margin));
        }
        Ok(match identity.known() {
            Some(KnownChain::Moonbeam) => FinalityStrategy::Moonbeam(MoonbeamFinality::default()),
            Some(KnownChain::Polygon) => {
                FinalityStrategy::Polygon(PolygonFinality::new(self.ethereum()?.contracts))
            }
            Some(KnownChain::Arbitrum) => FinalityStrategy::Arbitrum(ArbitrumFinality::new(
                identity,
                self.ethereum()?.resilient,
                self.metadata.clone(),
            )),
            _ => FinalityStrategy::Native,
        })
    }

    fn ethereum(&self) -> Result<EthereumHandles> {
        self.ethereum
            .clone()
            .ok_or_else(|| eyre!("Ethereum must be configured with RPC endpoints"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::InMemoryMetadataStore;
    use crate::settings::RawSettings;

    fn settings(value: serde_json::Value) -> Settings {
        let raw: RawSettings = serde_json::from_value(value).unwrap();
        Settings::try_from(raw).unwrap()
    }

    fn metrics() -> CoreMetrics {
        CoreMetrics::new("ingester", 0, prometheus::Registry::new()).unwrap()
    }

    #[test]
    fn builds_every_protocol() {
        let settings = settings(json!({
            "chains": {
                "polygon": { "rpcs": ["https://polygon.example"] },
                "ethereum": { "rpcs": ["https://eth-a.example", "https://eth-b.example"] },
                "arbitrum": { "rpcs": ["https://arb.example"] },
                "bsc": { "rpcs": ["https://bsc.example"] },
                "solana": { "rpcs": ["https://sol.example"] },
                "sui": { "rpcs": ["https://sui.example"] },
                "osmosis": { "rpcs": ["https://osmo.example"] },
                "near": { "rpcs": ["https://near.example"] },
                "algorand": {
                    "rpcs": ["https://algod.example"],
                    "indexer_rpcs": ["https://idx.example"]
                },
                "celo": { "rpcs": [] }
            }
        }));
        let metrics = metrics();
        let chains =
            build_chains(&settings, &metrics, Arc::new(InMemoryMetadataStore::default())).unwrap();

        assert_eq!(chains.len(), 9);
        assert!(!chains.contains_key("celo"));
        assert_eq!(chains["algorand"].health_checks.len(), 2);
        assert_eq!(chains["ethereum"].health_checks.len(), 1);
        assert_eq!(chains["polygon"].repository.chain().id(), 5);
        assert_eq!(chains["bsc"].guard.chain(), "bsc");
    }

    #[test]
    fn configured_margin_replaces_native_tags() {
        let settings = settings(json!({
            "chains": {
                "fantom": { "rpcs": ["https://ftm.example"], "finality_safety_margin": 4 }
            }
        }));
        let metrics = metrics();
        let builder =
            ChainBuilder::new(&metrics, Arc::new(InMemoryMetadataStore::default())).unwrap();
        let strategy = builder
            .finality_strategy(settings.chain("fantom").unwrap())
            .unwrap();
        assert!(matches!(strategy, FinalityStrategy::SafetyMargin(4)));
    }

    #[test]
    fn polygon_without_ethereum_fails() {
        let polygon = settings(json!({
            "chains": {
                "polygon": { "rpcs": ["https://polygon.example"] },
                "ethereum": { "rpcs": ["https://eth.example"] }
            }
        }))
        .chains
        .remove("polygon")
        .unwrap();
        let metrics = metrics();
        let mut builder =
            ChainBuilder::new(&metrics, Arc::new(InMemoryMetadataStore::default())).unwrap();
        assert!(builder.build(&polygon).is_err());
    }
}
