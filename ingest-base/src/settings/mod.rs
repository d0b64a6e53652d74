//! Settings of the ingester.
//!
//! Settings are loaded with the `config` crate from, in increasing order of
//! precedence:
//!
//! 1. every `./config/*.json` file,
//! 2. the comma separated files listed in `CONFIG_FILES`,
//! 3. environment variables prefixed with `INGEST__`, using `__` as the path
//!    separator, e.g. `INGEST__METRICS_PORT=9091` or
//!    `INGEST__CHAINS__ETHEREUM__BATCH_SIZE=5`.
//!
//! Keys are snake_case. Job definitions live in a separate camelCase JSON file
//! named by `jobs_file`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::Deserialize;
use url::Url;

use ingest_core::rpc_clients::{RpcEndpoint, DEFAULT_RPC_TIMEOUT};
use ingest_core::{
    ChainIdentity, ChainIdentityError, ChainProtocol, JobDefinition, KnownChain, SourceAction,
};

pub use self::loader::load_settings;
pub use self::trace::TracingConfig;
use crate::db::MetadataConf;
use crate::handlers::HandlerRegistry;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
use crate::HealthCheckConf;

mod loader;
/// Tracing subscriber management
pub mod trace;

/// Default port of the metrics server.
pub const DEFAULT_METRICS_PORT: u16 = 9090;
/// Default per-request timeout of EVM endpoints.
pub const DEFAULT_EVM_RPC_TIMEOUT: Duration = Duration::from_secs(5);
/// Default time allowed to the job loops to finish on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors which prevent the ingester from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Chain `{chain}`: {source}")]
    ChainIdentity {
        chain: String,
        #[source]
        source: ChainIdentityError,
    },
    #[error("Chain `{0}` has no RPC endpoints")]
    MissingRpcs(String),
    #[error("Chain `{chain}` needs indexer endpoints (`indexer_rpcs`)")]
    MissingIndexerRpcs { chain: String },
    #[error("Chain `{chain}` requires `{requires}` to be configured with RPC endpoints")]
    MissingDependency { chain: String, requires: String },
    #[error("Job `{job}` polls chain `{chain}`, which is not configured")]
    UnknownChain { job: String, chain: String },
    #[error("Duplicate job id `{0}`")]
    DuplicateJob(String),
    #[error("Job `{job}`: fromBlock {from} is greater than toBlock {to}")]
    InvalidRange { job: String, from: u64, to: u64 },
    #[error("Job `{job}`: blockBatchSize must be greater than zero")]
    ZeroBatchSize { job: String },
    #[error("Job `{job}`: action {action:?} cannot poll {protocol} chain `{chain}`")]
    ProtocolMismatch {
        job: String,
        action: SourceAction,
        chain: String,
        protocol: ChainProtocol,
    },
    #[error("Job `{job}`: unknown mapper `{mapper}`")]
    UnknownMapper { job: String, mapper: String },
    #[error("Job `{job}`: unknown target `{target}`")]
    UnknownTarget { job: String, target: String },
    #[error("Rate limit of chain `{0}` must allow at least one call per non-zero period")]
    InvalidRateLimit(String),
}

/// An RPC endpoint as written in the settings: either a bare url or an
/// object.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawRpc {
    Url(Url),
    Full {
        url: Url,
        weight: Option<u32>,
        timeout_ms: Option<u64>,
        retries: Option<u32>,
    },
}

impl RawRpc {
    fn into_endpoint(self, default_timeout: Duration) -> RpcEndpoint {
        match self {
            RawRpc::Url(url) => RpcEndpoint {
                timeout: default_timeout,
                ..RpcEndpoint::new(url)
            },
            RawRpc::Full {
                url,
                weight,
                timeout_ms,
                retries,
            } => {
                let defaults = RpcEndpoint::new(url);
                RpcEndpoint {
                    weight: weight.unwrap_or(defaults.weight),
                    timeout: timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default_timeout),
                    retries: retries.unwrap_or(defaults.retries),
                    ..defaults
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChainConf {
    chain_id: Option<u16>,
    protocol: Option<ChainProtocol>,
    #[serde(default)]
    rpcs: Vec<RawRpc>,
    #[serde(default)]
    indexer_rpcs: Vec<RawRpc>,
    #[serde(default)]
    rate_limit: RateLimiterConfig,
    #[serde(default)]
    circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    health_check: HealthCheckConf,
    batch_size: Option<usize>,
    finality_safety_margin: Option<u64>,
}

/// Settings as deserialized by the `config` crate, before validation.
#[derive(Debug, Deserialize)]
pub struct RawSettings {
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
    #[serde(default)]
    tracing: TracingConfig,
    #[serde(default)]
    metadata: MetadataConf,
    #[serde(default)]
    chains: BTreeMap<String, RawChainConf>,
    jobs_file: Option<PathBuf>,
    job_reload_interval_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

/// Settings of one chain.
#[derive(Clone, Debug)]
pub struct ChainConf {
    pub identity: ChainIdentity,
    /// Endpoints of the chain's node API
    pub rpcs: Vec<RpcEndpoint>,
    /// Endpoints of an indexer API, used by chains whose node API cannot
    /// search transactions (Algorand)
    pub indexer_rpcs: Vec<RpcEndpoint>,
    pub rate_limit: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_check: HealthCheckConf,
    /// Maximum number of per-block requests sent in one batch
    pub batch_size: Option<usize>,
    /// Report `latest - margin` as the height of every finality tag
    pub finality_safety_margin: Option<u64>,
}

impl ChainConf {
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn protocol(&self) -> ChainProtocol {
        self.identity.protocol()
    }
}

/// Validated settings.
#[derive(Debug)]
pub struct Settings {
    pub metrics_port: u16,
    pub tracing: TracingConfig,
    pub metadata: MetadataConf,
    /// Chains by configured name
    pub chains: BTreeMap<String, ChainConf>,
    pub jobs_file: Option<PathBuf>,
    /// How often job definitions are re-read to pick up pause changes
    pub job_reload_interval: Option<Duration>,
    pub shutdown_timeout: Duration,
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigurationError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let mut chains = BTreeMap::new();
        for (name, chain) in raw.chains {
            let identity = ChainIdentity::from_config(&name, chain.chain_id, chain.protocol)
                .map_err(|source| ConfigurationError::ChainIdentity {
                    chain: name.clone(),
                    source,
                })?;
            let default_timeout = match identity.protocol() {
                ChainProtocol::Evm => DEFAULT_EVM_RPC_TIMEOUT,
                _ => DEFAULT_RPC_TIMEOUT,
            };
            if chain.rate_limit.limit == 0 || chain.rate_limit.period.is_zero() {
                return Err(ConfigurationError::InvalidRateLimit(name));
            }
            let conf = ChainConf {
                identity,
                rpcs: chain
                    .rpcs
                    .into_iter()
                    .map(|r| r.into_endpoint(default_timeout))
                    .collect(),
                indexer_rpcs: chain
                    .indexer_rpcs
                    .into_iter()
                    .map(|r| r.into_endpoint(default_timeout))
                    .collect(),
                rate_limit: chain.rate_limit,
                circuit_breaker: chain.circuit_breaker,
                health_check: chain.health_check,
                batch_size: chain.batch_size,
                finality_safety_margin: chain.finality_safety_margin,
            };
            chains.insert(name, conf);
        }

        let settings = Settings {
            metrics_port: raw.metrics_port,
            tracing: raw.tracing,
            metadata: raw.metadata,
            chains,
            jobs_file: raw.jobs_file,
            job_reload_interval: raw.job_reload_interval_ms.map(Duration::from_millis),
            shutdown_timeout: raw
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        };
        settings.validate_chains()?;
        Ok(settings)
    }
}

impl Settings {
    /// Look up a chain by its configured name, case-insensitively.
    pub fn chain(&self, name: &str) -> Option<&ChainConf> {
        self.chains.get(name).or_else(|| {
            self.chains
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, c)| c)
        })
    }

    fn has_rpcs(&self, chain: KnownChain) -> bool {
        self.chains
            .values()
            .any(|c| c.identity.is_known(chain) && !c.rpcs.is_empty())
    }

    fn validate_chains(&self) -> Result<(), ConfigurationError> {
        for (name, chain) in &self.chains {
            if chain.protocol() == ChainProtocol::Algorand
                && !chain.rpcs.is_empty()
                && chain.indexer_rpcs.is_empty()
            {
                return Err(ConfigurationError::MissingIndexerRpcs {
                    chain: name.clone(),
                });
            }
            let needs_ethereum = chain.identity.is_known(KnownChain::Arbitrum)
                || chain.identity.is_known(KnownChain::Polygon);
            if needs_ethereum && !chain.rpcs.is_empty() && !self.has_rpcs(KnownChain::Ethereum) {
                return Err(ConfigurationError::MissingDependency {
                    chain: name.clone(),
                    requires: KnownChain::Ethereum.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Read and validate the job definitions named by `jobs_file`. No file
    /// means no jobs.
    pub fn load_jobs(&self, registry: &HandlerRegistry) -> Result<Vec<JobDefinition>> {
        let Some(path) = &self.jobs_file else {
            return Ok(vec![]);
        };
        let jobs = read_jobs(path)?;
        self.validate_jobs(&jobs, registry)?;
        Ok(jobs)
    }

    /// Check jobs against the configured chains and known handlers.
    pub fn validate_jobs(
        &self,
        jobs: &[JobDefinition],
        registry: &HandlerRegistry,
    ) -> Result<(), ConfigurationError> {
        let mut ids = HashSet::new();
        for job in jobs {
            if !ids.insert(job.id.as_str()) {
                return Err(ConfigurationError::DuplicateJob(job.id.clone()));
            }
            let chain = self
                .chain(&job.chain)
                .ok_or_else(|| ConfigurationError::UnknownChain {
                    job: job.id.clone(),
                    chain: job.chain.clone(),
                })?;
            if chain.rpcs.is_empty() {
                return Err(ConfigurationError::MissingRpcs(job.chain.clone()));
            }
            if job.source.action.protocol() != chain.protocol() {
                return Err(ConfigurationError::ProtocolMismatch {
                    job: job.id.clone(),
                    action: job.source.action,
                    chain: job.chain.clone(),
                    protocol: chain.protocol(),
                });
            }

            let config = &job.source.config;
            if let (Some(from), Some(to)) = (config.from_block, config.to_block) {
                if from > to {
                    return Err(ConfigurationError::InvalidRange {
                        job: job.id.clone(),
                        from,
                        to,
                    });
                }
            }
            if config.block_batch_size == Some(0) {
                return Err(ConfigurationError::ZeroBatchSize {
                    job: job.id.clone(),
                });
            }

            for handler in &job.handlers {
                if !registry.has_mapper(&handler.mapper) {
                    return Err(ConfigurationError::UnknownMapper {
                        job: job.id.clone(),
                        mapper: handler.mapper.clone(),
                    });
                }
                if !registry.has_target(&handler.target) {
                    return Err(ConfigurationError::UnknownTarget {
                        job: job.id.clone(),
                        target: handler.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Read a JSON array of job definitions.
pub fn read_jobs(path: &Path) -> Result<Vec<JobDefinition>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read jobs file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid job definitions in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: serde_json::Value) -> RawSettings {
        serde_json::from_value(value).unwrap()
    }

    fn settings() -> Settings {
        Settings::try_from(raw(json!({
            "metadata": { "type": "memory" },
            "chains": {
                "ethereum": {
                    "rpcs": [
                        "https://eth-a.example",
                        { "url": "https://eth-b.example", "weight": 3, "retries": 1 }
                    ]
                },
                "solana": {
                    "rpcs": ["https://sol.example"],
                    "rate_limit": { "limit": 10, "period_ms": 1000 }
                },
                "neutron": { "chain_id": 22, "protocol": "cosmos", "rpcs": [] }
            }
        })))
        .unwrap()
    }

    fn job(value: serde_json::Value) -> JobDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn evm_job(id: &str, config: serde_json::Value) -> JobDefinition {
        job(json!({
            "id": id,
            "chain": "ethereum",
            "source": { "action": "PollEvm", "config": config },
            "handlers": [{ "action": "HandleEvmLogs", "target": "log", "mapper": "raw" }]
        }))
    }

    #[test]
    fn parses_chains_with_defaults() {
        let settings = settings();
        assert_eq!(settings.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(settings.metadata, MetadataConf::Memory);

        let eth = settings.chain("Ethereum").unwrap();
        assert_eq!(eth.identity.id(), 2);
        assert_eq!(eth.rpcs[0].timeout, DEFAULT_EVM_RPC_TIMEOUT);
        assert_eq!(eth.rpcs[1].weight, 3);
        assert_eq!(eth.rpcs[1].retries, 1);

        let sol = settings.chain("solana").unwrap();
        assert_eq!(sol.rpcs[0].timeout, DEFAULT_RPC_TIMEOUT);
        assert_eq!(sol.rate_limit.limit, 10);
        assert_eq!(sol.rate_limit.period, Duration::from_secs(1));

        assert_eq!(settings.chain("neutron").unwrap().identity.id(), 22);
    }

    #[test]
    fn rejects_unknown_chain_without_id() {
        let err = Settings::try_from(raw(json!({ "chains": { "mystery": { "rpcs": [] } } })))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ChainIdentity { .. }));
    }

    #[test]
    fn polygon_requires_ethereum() {
        let err = Settings::try_from(raw(json!({
            "chains": { "polygon": { "rpcs": ["https://polygon.example"] } }
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingDependency { .. }));
    }

    #[test]
    fn rejects_inverted_range() {
        let settings = settings();
        let registry = HandlerRegistry::with_builtins();
        let err = settings
            .validate_jobs(
                &[evm_job("a", json!({ "fromBlock": "100", "toBlock": 10 }))],
                &registry,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRange { from: 100, to: 10, .. }));
    }

    #[test]
    fn rejects_bad_jobs() {
        let settings = settings();
        let registry = HandlerRegistry::with_builtins();

        let dup = [evm_job("a", json!({})), evm_job("a", json!({}))];
        assert!(matches!(
            settings.validate_jobs(&dup, &registry),
            Err(ConfigurationError::DuplicateJob(_))
        ));

        let zero = [evm_job("a", json!({ "blockBatchSize": 0 }))];
        assert!(matches!(
            settings.validate_jobs(&zero, &registry),
            Err(ConfigurationError::ZeroBatchSize { .. })
        ));

        let no_rpcs = [job(json!({
            "id": "n", "chain": "neutron",
            "source": { "action": "PollCosmos", "config": {} }
        }))];
        assert!(matches!(
            settings.validate_jobs(&no_rpcs, &registry),
            Err(ConfigurationError::MissingRpcs(_))
        ));

        let mismatch = [job(json!({
            "id": "s", "chain": "solana",
            "source": { "action": "PollEvm", "config": {} }
        }))];
        assert!(matches!(
            settings.validate_jobs(&mismatch, &registry),
            Err(ConfigurationError::ProtocolMismatch { .. })
        ));

        let unknown_chain = [job(json!({
            "id": "x", "chain": "base",
            "source": { "action": "PollEvm", "config": {} }
        }))];
        assert!(matches!(
            settings.validate_jobs(&unknown_chain, &registry),
            Err(ConfigurationError::UnknownChain { .. })
        ));

        let mut unknown_mapper = evm_job("m", json!({}));
        unknown_mapper.handlers[0].mapper = "wormhole".into();
        assert!(matches!(
            settings.validate_jobs(&[unknown_mapper], &registry),
            Err(ConfigurationError::UnknownMapper { .. })
        ));

        assert!(settings
            .validate_jobs(&[evm_job("ok", json!({ "fromBlock": 1, "toBlock": 2 }))], &registry)
            .is_ok());
    }

    #[test]
    fn reads_jobs_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(
            &path,
            json!([{
                "id": "poll-ethereum",
                "chain": "ethereum",
                "source": { "action": "PollEvm", "config": { "fromBlock": "0x10" } },
                "handlers": []
            }])
            .to_string(),
        )
        .unwrap();

        let mut settings = settings();
        settings.jobs_file = Some(path);
        let jobs = settings
            .load_jobs(&HandlerRegistry::with_builtins())
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source.config.from_block, Some(16));
    }
}
