use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, warn};

use ingest_core::{JobExecution, JobExecutionTracker, JobStatus, TrackerError};

/// Tracks executions in process memory: the running execution of every job
/// and the last stopped one, both keyed by job id.
#[derive(Debug, Default)]
pub struct InMemoryJobExecutionTracker {
    running: DashMap<String, JobExecution>,
    last_stopped: DashMap<String, JobExecution>,
}

impl InMemoryJobExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobExecutionTracker for InMemoryJobExecutionTracker {
    async fn start(&self, job_id: &str) -> Result<JobExecution, TrackerError> {
        match self.running.entry(job_id.to_owned()) {
            Entry::Occupied(_) => Err(TrackerError::AlreadyRunning(job_id.to_owned())),
            Entry::Vacant(slot) => {
                let execution = JobExecution::start(job_id);
                debug!(job = job_id, execution = %execution.id, "Started job execution");
                slot.insert(execution.clone());
                Ok(execution)
            }
        }
    }

    async fn stop(
        &self,
        execution: &JobExecution,
        error: Option<String>,
    ) -> Result<JobExecution, TrackerError> {
        let unknown = || TrackerError::UnknownExecution {
            job_id: execution.job_id.clone(),
            execution: execution.id,
        };
        let (_, mut stopped) = self
            .running
            .remove_if(&execution.job_id, |_, running| running.id == execution.id)
            .ok_or_else(unknown)?;

        stopped.status = JobStatus::Stopped;
        stopped.finished_at = Some(Utc::now());
        if let Some(error) = &error {
            warn!(job = %stopped.job_id, execution = %stopped.id, error, "Job execution stopped with error");
        }
        stopped.error = error;
        self.last_stopped
            .insert(stopped.job_id.clone(), stopped.clone());
        Ok(stopped)
    }

    async fn is_running(&self, job_id: &str) -> bool {
        self.running.contains_key(job_id)
    }

    async fn executions(&self) -> Vec<JobExecution> {
        let mut all: Vec<_> = self
            .running
            .iter()
            .map(|e| e.value().clone())
            .chain(self.last_stopped.iter().map(|e| e.value().clone()))
            .collect();
        all.sort_by_key(|e| e.started_at);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_start_fails_until_stopped() {
        let tracker = InMemoryJobExecutionTracker::new();
        let first = tracker.start("poll-sui").await.unwrap();
        assert!(tracker.is_running("poll-sui").await);
        assert!(matches!(
            tracker.start("poll-sui").await,
            Err(TrackerError::AlreadyRunning(id)) if id == "poll-sui"
        ));

        let stopped = tracker
            .stop(&first, Some("shutdown".into()))
            .await
            .unwrap();
        assert_eq!(stopped.status, JobStatus::Stopped);
        assert_eq!(stopped.error.as_deref(), Some("shutdown"));
        assert!(stopped.finished_at.is_some());
        assert!(!tracker.is_running("poll-sui").await);

        let second = tracker.start("poll-sui").await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(tracker.executions().await.len(), 2);
    }

    #[tokio::test]
    async fn stopping_a_stale_execution_fails() {
        let tracker = InMemoryJobExecutionTracker::new();
        let first = tracker.start("poll-near").await.unwrap();
        tracker.stop(&first, None).await.unwrap();
        let _second = tracker.start("poll-near").await.unwrap();

        assert!(matches!(
            tracker.stop(&first, None).await,
            Err(TrackerError::UnknownExecution { .. })
        ));
        assert!(tracker.is_running("poll-near").await);
    }

    #[tokio::test]
    async fn only_the_last_stopped_execution_is_kept() {
        let tracker = InMemoryJobExecutionTracker::new();
        let mut last = None;
        for _ in 0..5 {
            let execution = tracker.start("poll-algorand").await.unwrap();
            last = Some(tracker.stop(&execution, None).await.unwrap());
        }
        tracker.start("poll-cosmos").await.unwrap();

        let executions = tracker.executions().await;
        assert_eq!(executions.len(), 2);
        assert!(executions.contains(&last.unwrap()));
    }
}
