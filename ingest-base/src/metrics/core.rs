use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::OnceLock;

use eyre::{eyre, Result};
use parking_lot::Mutex;
use prometheus::{
    labels, opts, register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, CounterVec,
    Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Registry,
};

use ethers_prometheus::{
    PrometheusClientMetrics, PrometheusClientMetricsBuilder, PROVIDER_OFFLINE_HELP,
    PROVIDER_OFFLINE_LABELS, REQUEST_COUNT_HELP, REQUEST_COUNT_LABELS,
    REQUEST_DURATION_SECONDS_HELP, REQUEST_DURATION_SECONDS_LABELS,
};

/// Macro to prefix a string with the namespace.
macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", super::NAMESPACE, $name)
    };
}

/// Metrics of the ingester process
pub struct CoreMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,
    const_labels: HashMap<String, String>,
    listen_port: u16,
    agent_name: String,

    job_executions: IntCounterVec,
    jobs_running: IntGaugeVec,
    chain_height: IntGaugeVec,
    cursor: IntGaugeVec,
    sync_eta: GaugeVec,
    handler_failures: IntCounterVec,

    pool_rpc_latency: GaugeVec,
    pool_rpc_height: IntGaugeVec,
    rate_limited: IntCounterVec,
    circuit_breaker_open: IntGaugeVec,

    /// Set of metrics that wrap every instrumented provider.
    client_metrics: OnceLock<PrometheusClientMetrics>,

    /// Metrics registered on first use through `count` and `measure`.
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    ///
    /// - `for_agent` name of the agent these metrics are tracking.
    /// - `listen_port` port to start the HTTP server on.
    /// - `registry` prometheus registry to attach the metrics to
    pub fn new(for_agent: &str, listen_port: u16, registry: Registry) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            namespaced!("baselib_version") => env!("CARGO_PKG_VERSION").into(),
            "agent".into() => for_agent.into(),
        };
        let const_labels_ref = const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<HashMap<_, _>>();

        let job_executions = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("job_execution_total"),
                "Number of polling iterations run, by outcome",
                const_labels_ref
            ),
            &["job", "chain", "outcome"],
            registry
        )?;

        let jobs_running = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("job_running"),
                "Whether the polling loop of a job is running",
                const_labels_ref
            ),
            &["job", "chain"],
            registry
        )?;

        let chain_height = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("polling_chain_height"),
                "Last chain height seen by a job at its commitment level",
                const_labels_ref
            ),
            &["job", "chain"],
            registry
        )?;

        let cursor = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("polling_cursor"),
                "Last block committed by a job",
                const_labels_ref
            ),
            &["job", "chain"],
            registry
        )?;

        let sync_eta = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("polling_sync_eta_seconds"),
                "Estimated seconds until a job reaches the chain head",
                const_labels_ref
            ),
            &["job", "chain"],
            registry
        )?;

        let handler_failures = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("handler_failures_total"),
                "Number of batches a handler failed to process",
                const_labels_ref
            ),
            &["job", "handler"],
            registry
        )?;

        let pool_rpc_latency = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("pool_rpc_latency_seconds"),
                "Latency of the last health probe of a provider",
                const_labels_ref
            ),
            &["chain", "provider"],
            registry
        )?;

        let pool_rpc_height = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("pool_rpc_height"),
                "Height reported by the last health probe of a provider",
                const_labels_ref
            ),
            &["chain", "provider"],
            registry
        )?;

        let rate_limited = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("rate_limited_total"),
                "Number of calls rejected by a chain's rate limiter",
                const_labels_ref
            ),
            &["chain"],
            registry
        )?;

        let circuit_breaker_open = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("circuit_breaker_open"),
                "Whether a chain's circuit breaker currently rejects calls",
                const_labels_ref
            ),
            &["chain"],
            registry
        )?;

        Ok(Self {
            agent_name: for_agent.into(),
            registry,
            listen_port,
            const_labels,
            job_executions,
            jobs_running,
            chain_height,
            cursor,
            sync_eta,
            handler_failures,
            pool_rpc_latency,
            pool_rpc_height,
            rate_limited,
            circuit_breaker_open,
            client_metrics: OnceLock::new(),
            counters: Default::default(),
            gauges: Default::default(),
        })
    }

    /// Create the provider metrics attached to this core metrics instance.
    pub fn client_metrics(&self) -> Result<PrometheusClientMetrics> {
        if let Some(metrics) = self.client_metrics.get() {
            return Ok(metrics.clone());
        }
        let metrics = PrometheusClientMetricsBuilder::default()
            .request_count(self.new_int_counter(
                "request_count",
                REQUEST_COUNT_HELP,
                REQUEST_COUNT_LABELS,
            )?)
            .request_duration_seconds(self.new_counter(
                "request_duration_seconds",
                REQUEST_DURATION_SECONDS_HELP,
                REQUEST_DURATION_SECONDS_LABELS,
            )?)
            .provider_offline(self.new_int_gauge(
                "provider_offline",
                PROVIDER_OFFLINE_HELP,
                PROVIDER_OFFLINE_LABELS,
            )?)
            .build()?;
        Ok(self.client_metrics.get_or_init(|| metrics).clone())
    }

    /// Create and register a new int gauge.
    pub fn new_int_gauge(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntGaugeVec> {
        Ok(register_int_gauge_vec_with_registry!(
            opts!(namespaced!(metric_name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Create and register a new gauge.
    pub fn new_gauge(&self, metric_name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
        Ok(register_gauge_vec_with_registry!(
            opts!(namespaced!(metric_name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Create and register a new counter.
    pub fn new_counter(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<CounterVec> {
        Ok(register_counter_vec_with_registry!(
            opts!(namespaced!(metric_name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Create and register a new int counter.
    pub fn new_int_counter(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec> {
        Ok(register_int_counter_vec_with_registry!(
            opts!(namespaced!(metric_name), help, self.const_labels_str()),
            labels,
            self.registry
        )?)
    }

    /// Increment the counter `metric_name`, registering it on first use.
    /// Every call for the same name must use the same label names.
    pub fn count(&self, metric_name: &str, labels: &[(&str, &str)]) -> Result<()> {
        let names = labels.iter().map(|(k, _)| *k).collect::<Vec<_>>();
        let values = labels.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        let mut counters = self.counters.lock();
        let counter = match counters.get(metric_name) {
            Some(counter) => counter.clone(),
            None => {
                let counter = self.new_int_counter(metric_name, metric_name, &names)?;
                counters.insert(metric_name.to_owned(), counter.clone());
                counter
            }
        };
        counter
            .get_metric_with_label_values(&values)
            .map_err(|e| eyre!("Cannot count {metric_name}: {e}"))?
            .inc();
        Ok(())
    }

    /// Set the gauge `metric_name` to `value`, registering it on first use.
    /// Every call for the same name must use the same label names.
    pub fn measure(&self, metric_name: &str, value: f64, labels: &[(&str, &str)]) -> Result<()> {
        let names = labels.iter().map(|(k, _)| *k).collect::<Vec<_>>();
        let values = labels.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        let mut gauges = self.gauges.lock();
        let gauge = match gauges.get(metric_name) {
            Some(gauge) => gauge.clone(),
            None => {
                let gauge = self.new_gauge(metric_name, metric_name, &names)?;
                gauges.insert(metric_name.to_owned(), gauge.clone());
                gauge
            }
        };
        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| eyre!("Cannot measure {metric_name}: {e}"))?
            .set(value);
        Ok(())
    }

    /// Number of polling iterations by outcome.
    ///
    /// Labels:
    /// - `job`: job id.
    /// - `chain`: chain the job polls.
    /// - `outcome`: `committed`, `waiting`, `failed` or `stopped`.
    pub fn job_executions(&self) -> IntCounterVec {
        self.job_executions.clone()
    }

    /// 1 while a job's loop is running.
    pub fn jobs_running(&self) -> IntGaugeVec {
        self.jobs_running.clone()
    }

    /// Chain head seen by each job.
    pub fn chain_height(&self) -> IntGaugeVec {
        self.chain_height.clone()
    }

    /// Committed cursor of each job.
    pub fn cursor(&self) -> IntGaugeVec {
        self.cursor.clone()
    }

    /// Estimated time to reach the chain head.
    pub fn sync_eta(&self) -> GaugeVec {
        self.sync_eta.clone()
    }

    /// Failed handler dispatches.
    pub fn handler_failures(&self) -> IntCounterVec {
        self.handler_failures.clone()
    }

    /// Latency of the last health probe per provider.
    pub fn pool_rpc_latency(&self) -> GaugeVec {
        self.pool_rpc_latency.clone()
    }

    /// Height of the last health probe per provider.
    pub fn pool_rpc_height(&self) -> IntGaugeVec {
        self.pool_rpc_height.clone()
    }

    /// Rate limiter rejections per chain.
    pub fn rate_limited(&self) -> IntCounterVec {
        self.rate_limited.clone()
    }

    /// Circuit breaker state per chain.
    pub fn circuit_breaker_open(&self) -> IntGaugeVec {
        self.circuit_breaker_open.clone()
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format)
    /// report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }

    /// The encoded report as a string.
    pub fn report(&self) -> Result<String> {
        Ok(String::from_utf8(self.gather()?)?)
    }

    /// Get the name of this agent, e.g. "ingester"
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Port the metrics server listens on
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// The registry all metrics are attached to
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    fn const_labels_str(&self) -> HashMap<&str, &str> {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl Debug for CoreMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CoreMetrics {{ agent_name: {}, listen_port: {} }}",
            self.agent_name, self.listen_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> CoreMetrics {
        CoreMetrics::new("test", 9090, Registry::new()).unwrap()
    }

    #[test]
    fn count_and_measure_register_on_first_use() {
        let metrics = metrics();
        metrics
            .count("published_events", &[("target", "log")])
            .unwrap();
        metrics
            .count("published_events", &[("target", "log")])
            .unwrap();
        metrics
            .measure("queue_depth", 3.0, &[("target", "log")])
            .unwrap();

        let report = metrics.report().unwrap();
        assert!(report.contains("ingest_published_events"));
        assert!(report.contains("target=\"log\"} 2"));
        assert!(report.contains("ingest_queue_depth"));
    }

    #[test]
    fn count_rejects_mismatched_labels() {
        let metrics = metrics();
        metrics.count("retries", &[("chain", "sui")]).unwrap();
        assert!(metrics
            .count("retries", &[("chain", "sui"), ("job", "x")])
            .is_err());
    }

    #[test]
    fn client_metrics_are_registered_once() {
        let metrics = metrics();
        metrics.client_metrics().unwrap();
        metrics.client_metrics().unwrap();
    }
}
