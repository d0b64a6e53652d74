use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ingest_base::handlers::HandlerRegistry;
use ingest_base::polling::PollingMetrics;
use ingest_base::settings::Settings;
use ingest_base::{
    build_chains, spawn_health_check, BaseAgent, CoreMetrics, HealthCheck,
    InMemoryJobExecutionTracker, Server,
};
use ingest_core::JobDefinition;

use crate::jobs::{ChainHandle, JobSupervisor};

/// Runs every configured job against the configured chains.
#[derive(Debug)]
pub struct Ingester {
    settings: Settings,
    registry: Arc<HandlerRegistry>,
    jobs: Vec<JobDefinition>,
    supervisor: JobSupervisor,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    server: Arc<Server>,
}

#[async_trait]
impl BaseAgent for Ingester {
    const AGENT_NAME: &'static str = "ingester";

    async fn from_settings(settings: Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized,
    {
        let registry = Arc::new(HandlerRegistry::with_builtins());
        let jobs = settings.load_jobs(&registry)?;
        let metadata = settings.metadata.open()?;

        let chains = build_chains(&settings, &metrics, metadata.clone())?;
        let health_checks = chains
            .values()
            .flat_map(|chain| chain.health_checks.iter().cloned())
            .collect();
        let supervisor = JobSupervisor::new(
            chains
                .iter()
                .map(|(name, chain)| (name.clone(), ChainHandle::from(chain))),
            registry.clone(),
            metadata,
            Arc::new(InMemoryJobExecutionTracker::new()),
            PollingMetrics::from(metrics.as_ref()),
        );
        let server = Arc::new(Server::new(settings.metrics_port, metrics));

        info!(
            chains = chains.len(),
            jobs = jobs.len(),
            "Ingester initialized"
        );
        Ok(Self {
            settings,
            registry,
            jobs,
            supervisor,
            health_checks,
            server,
        })
    }

    async fn run(mut self) -> Result<()> {
        let (_, server_task) = self.server.clone().run().await?;
        let health_tasks = self
            .health_checks
            .iter()
            .cloned()
            .map(spawn_health_check)
            .collect::<Vec<_>>();

        self.supervisor.reconcile(&self.jobs).await;

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        let reload = self.settings.job_reload_interval;
        loop {
            tokio::select! {
                res = &mut shutdown => {
                    if let Err(e) = res {
                        warn!(error = ?e, "Failed to listen for shutdown signals");
                    }
                    break;
                }
                _ = sleep_or_never(reload) => self.reload_jobs().await,
            }
        }

        info!("Shutting down");
        self.supervisor.shutdown(self.settings.shutdown_timeout).await;
        abort_all(health_tasks);
        server_task.abort();
        Ok(())
    }
}

impl Ingester {
    /// Re-read the job definitions and apply pause changes. Invalid files are
    /// logged and the previous definitions stay in effect.
    async fn reload_jobs(&mut self) {
        match self.settings.load_jobs(&self.registry) {
            Ok(jobs) => self.jobs = jobs,
            Err(e) => warn!(error = ?e, "Failed to reload job definitions"),
        }
        self.supervisor.reconcile(&self.jobs).await;
    }
}

async fn sleep_or_never(interval: Option<Duration>) {
    match interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => std::future::pending().await,
    }
}

fn abort_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
