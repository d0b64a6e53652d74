use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{JobExecution, TrackerError};

/// Guarantees at most one running execution per job id.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait JobExecutionTracker: Send + Sync + Debug {
    /// Record a new execution of `job_id`. Fails with
    /// [`TrackerError::AlreadyRunning`] while another execution is tracked.
    async fn start(&self, job_id: &str) -> Result<JobExecution, TrackerError>;

    /// Mark `execution` stopped, record `error` and release the job's lock.
    async fn stop(
        &self,
        execution: &JobExecution,
        error: Option<String>,
    ) -> Result<JobExecution, TrackerError>;

    /// Whether an execution of `job_id` is currently tracked.
    async fn is_running(&self, job_id: &str) -> bool;

    /// Running executions and the last stopped execution of every job.
    async fn executions(&self) -> Vec<JobExecution>;
}
