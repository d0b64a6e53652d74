use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ingest_base::handlers::HandlerRegistry;
use ingest_base::polling::{PollingEngine, PollingMetrics, RunOutcome};
use ingest_base::{ChainResources, ChainWatermark};
use ingest_core::{
    ChainBlockRepository, JobDefinition, JobExecution, JobExecutionTracker, MetadataStore,
    TrackerError,
};

/// What the jobs of one chain poll through.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    pub repository: Arc<dyn ChainBlockRepository>,
    pub watermark: Arc<ChainWatermark>,
}

impl From<&ChainResources> for ChainHandle {
    fn from(resources: &ChainResources) -> Self {
        Self {
            repository: resources.repository.clone(),
            watermark: resources.watermark.clone(),
        }
    }
}

/// A running job.
#[derive(Debug)]
pub struct JobHandle {
    engine: Arc<PollingEngine>,
    execution: JobExecution,
    task: JoinHandle<RunOutcome>,
}

impl JobHandle {
    pub fn engine(&self) -> &Arc<PollingEngine> {
        &self.engine
    }
}

/// Owns one polling task per active job and keeps the set of tasks in line
/// with the job definitions.
#[derive(Debug)]
pub struct JobSupervisor {
    /// Keyed by lowercase chain name
    chains: HashMap<String, ChainHandle>,
    registry: Arc<HandlerRegistry>,
    metadata: Arc<dyn MetadataStore>,
    tracker: Arc<dyn JobExecutionTracker>,
    metrics: PollingMetrics,
    jobs: HashMap<String, JobHandle>,
    /// Jobs which processed their `toBlock`; never restarted
    finished: HashSet<String>,
}

impl JobSupervisor {
    pub fn new(
        chains: impl IntoIterator<Item = (String, ChainHandle)>,
        registry: Arc<HandlerRegistry>,
        metadata: Arc<dyn MetadataStore>,
        tracker: Arc<dyn JobExecutionTracker>,
        metrics: PollingMetrics,
    ) -> Self {
        Self {
            chains: chains
                .into_iter()
                .map(|(name, chain)| (name.to_ascii_lowercase(), chain))
                .collect(),
            registry,
            metadata,
            tracker,
            metrics,
            jobs: HashMap::new(),
            finished: HashSet::new(),
        }
    }

    /// Ids of the jobs with a live task.
    pub fn running(&self) -> Vec<&str> {
        let mut ids = self.jobs.keys().map(String::as_str).collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn is_finished(&self, job_id: &str) -> bool {
        self.finished.contains(job_id)
    }

    pub fn job(&self, job_id: &str) -> Option<&JobHandle> {
        self.jobs.get(job_id)
    }

    /// Stop jobs which are paused or no longer defined and start the
    /// unpaused ones which are idle. Jobs that finished stay stopped.
    pub async fn reconcile(&mut self, definitions: &[JobDefinition]) {
        self.reap().await;

        let active = definitions
            .iter()
            .filter(|job| !job.paused)
            .map(|job| job.id.as_str())
            .collect::<HashSet<_>>();
        let to_stop = self
            .jobs
            .keys()
            .filter(|id| !active.contains(id.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for id in to_stop {
            info!(job = %id, "Stopping paused job");
            if let Some(handle) = self.jobs.remove(&id) {
                handle.engine.stop();
                self.join(id, handle).await;
            }
        }

        for job in definitions.iter().filter(|job| !job.paused) {
            if self.jobs.contains_key(&job.id) || self.finished.contains(&job.id) {
                continue;
            }
            if let Err(e) = self.start(job).await {
                error!(job = %job.id, error = ?e, "Failed to start job");
            }
        }
    }

    async fn start(&mut self, job: &JobDefinition) -> Result<()> {
        let chain = self
            .chains
            .get(&job.chain.to_ascii_lowercase())
            .ok_or_else(|| eyre!("chain `{}` is not configured", job.chain))?
            .clone();
        let handlers = self.registry.build(job, chain.repository.chain())?;
        let execution = match self.tracker.start(&job.id).await {
            Ok(execution) => execution,
            Err(TrackerError::AlreadyRunning(id)) => {
                warn!(job = %id, "Job already has a running execution");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let engine = Arc::new(PollingEngine::new(
            job.clone(),
            chain.repository,
            handlers,
            self.metadata.clone(),
            self.metrics.clone(),
            Some(chain.watermark),
        ));
        let task = tokio::spawn(run_job(
            engine.clone(),
            self.tracker.clone(),
            execution.clone(),
        ));
        info!(job = %job.id, chain = %job.chain, execution = %execution.id, "Started job");
        self.jobs.insert(
            job.id.clone(),
            JobHandle {
                engine,
                execution,
                task,
            },
        );
        Ok(())
    }

    /// Collect the tasks which ended on their own.
    async fn reap(&mut self) {
        let done = self
            .jobs
            .iter()
            .filter(|(_, handle)| handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in done {
            if let Some(handle) = self.jobs.remove(&id) {
                self.join(id, handle).await;
            }
        }
    }

    /// Await the task of `handle` and record how it ended.
    async fn join(&mut self, id: String, handle: JobHandle) {
        match handle.task.await {
            Ok(RunOutcome::Finished) => {
                info!(job = %id, "Job finished");
                self.finished.insert(id);
            }
            Ok(RunOutcome::Stopped) => debug!(job = %id, "Job stopped"),
            Err(e) => {
                error!(job = %id, error = %e, "Job task failed");
                stop_execution(&*self.tracker, &handle.execution, Some(e.to_string())).await;
            }
        }
    }

    /// Stop every engine, then wait up to `timeout` for their tasks.
    pub async fn shutdown(&mut self, timeout: Duration) {
        for handle in self.jobs.values() {
            handle.engine.stop();
        }
        let jobs = self.jobs.drain().collect::<Vec<_>>();
        info!(jobs = jobs.len(), ?timeout, "Waiting for jobs to stop");

        let tracker = self.tracker.clone();
        let results = join_all(jobs.into_iter().map(|(id, handle)| {
            let tracker = tracker.clone();
            async move {
                let JobHandle {
                    execution,
                    mut task,
                    ..
                } = handle;
                match tokio::time::timeout(timeout, &mut task).await {
                    Ok(Ok(outcome)) => (id, Some(outcome)),
                    Ok(Err(e)) => {
                        error!(job = %id, error = %e, "Job task failed");
                        stop_execution(&*tracker, &execution, Some(e.to_string())).await;
                        (id, None)
                    }
                    Err(_) => {
                        warn!(job = %id, "Job did not stop in time, aborting");
                        task.abort();
                        stop_execution(&*tracker, &execution, Some("shutdown timed out".into()))
                            .await;
                        (id, None)
                    }
                }
            }
        }))
        .await;
        for (id, outcome) in results {
            if outcome == Some(RunOutcome::Finished) {
                self.finished.insert(id);
            }
        }
    }
}

/// Run `engine` to completion and close its execution.
async fn run_job(
    engine: Arc<PollingEngine>,
    tracker: Arc<dyn JobExecutionTracker>,
    execution: JobExecution,
) -> RunOutcome {
    let outcome = engine.run().await;
    stop_execution(&*tracker, &execution, None).await;
    outcome
}

async fn stop_execution(
    tracker: &dyn JobExecutionTracker,
    execution: &JobExecution,
    error: Option<String>,
) {
    if let Err(e) = tracker.stop(execution, error).await {
        warn!(job = %execution.job_id, error = %e, "Failed to stop job execution");
    }
}
