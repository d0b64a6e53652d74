use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
}

/// One run of a job, from `start` to `stop`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub id: Uuid,
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobExecution {
    pub fn start(job_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }
}
