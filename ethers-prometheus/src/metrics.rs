use std::time::Instant;

use derive_builder::Builder;
use ingest_core::rpc_clients::RpcEndpoint;
use maplit::hashmap;
use prometheus::{CounterVec, IntCounterVec, IntGaugeVec};

/// Expected label names for the request metrics.
pub const REQUEST_COUNT_LABELS: &[&str] = &["provider_node", "chain", "method", "status"];
/// Help string for the metric.
pub const REQUEST_COUNT_HELP: &str = "Total number of requests made to this client";

/// Expected label names for the metric.
pub const REQUEST_DURATION_SECONDS_LABELS: &[&str] =
    &["provider_node", "chain", "method", "status"];
/// Help string for the metric.
pub const REQUEST_DURATION_SECONDS_HELP: &str = "Total number of seconds spent making requests";

/// Expected label names for the metric.
pub const PROVIDER_OFFLINE_LABELS: &[&str] = &["provider_node", "chain"];
/// Help string for the metric.
pub const PROVIDER_OFFLINE_HELP: &str = "Whether the provider is currently marked offline";

/// Container for all the relevant rpc client metrics.
#[derive(Clone, Builder, Default, Debug)]
pub struct PrometheusClientMetrics {
    /// Total number of requests made to this client.
    /// - `provider_node`: node this is connecting to, e.g. `alchemy.com`,
    ///   `quicknode.pro`, or `localhost:8545`.
    /// - `chain`: chain name the request was made on.
    /// - `method`: request method string.
    /// - `status`: `success` or `failure` depending on the response.
    #[builder(setter(into, strip_option), default)]
    pub request_count: Option<IntCounterVec>,

    /// Total number of seconds spent making requests, same labels as
    /// `request_count`.
    #[builder(setter(into, strip_option), default)]
    pub request_duration_seconds: Option<CounterVec>,

    /// 1 while the provider is marked offline, 0 otherwise.
    #[builder(setter(into, strip_option), default)]
    pub provider_offline: Option<IntGaugeVec>,
}

impl PrometheusClientMetrics {
    /// Update prometheus metrics
    pub fn increment_metrics(
        &self,
        config: &PrometheusConfig,
        method: &str,
        start: Instant,
        success: bool,
    ) {
        let labels = hashmap! {
            "provider_node" => config.node_host.as_str(),
            "chain" => config.chain_name.as_str(),
            "method" => method,
            "status" => if success { "success" } else { "failure" },
        };
        if let Some(counter) = &self.request_count {
            counter.with(&labels).inc()
        }
        if let Some(counter) = &self.request_duration_seconds {
            counter
                .with(&labels)
                .inc_by((Instant::now() - start).as_secs_f64())
        };
    }

    /// Reflect the provider's offline marker
    pub fn set_offline(&self, config: &PrometheusConfig, offline: bool) {
        if let Some(gauge) = &self.provider_offline {
            gauge
                .with(&hashmap! {
                    "provider_node" => config.node_host.as_str(),
                    "chain" => config.chain_name.as_str(),
                })
                .set(offline as i64);
        }
    }
}

/// Labels identifying one provider in metrics and logs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrometheusConfig {
    /// The "host" part of the URL this node is connecting to. E.g.
    /// `avalanche.api.onfinality.io`.
    pub node_host: String,
    /// Chain name this RPC client is connected to.
    pub chain_name: String,
}

impl PrometheusConfig {
    /// Labels for `endpoint` on `chain`
    pub fn from_endpoint(endpoint: &RpcEndpoint, chain: impl Into<String>) -> Self {
        Self {
            node_host: endpoint.host(),
            chain_name: chain.into(),
        }
    }
}
