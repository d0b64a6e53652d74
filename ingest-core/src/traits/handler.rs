use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::{ChainIdentity, ChainRecord, HandlerError, NormalizedEvent};

/// Context passed to a mapper alongside each record.
#[derive(Clone, Debug)]
pub struct MapperContext<'a> {
    pub job_id: &'a str,
    pub chain: &'a ChainIdentity,
    /// The handler's `config` object
    pub config: &'a serde_json::Value,
}

/// Turns raw chain records into normalized events.
#[auto_impl(&, Box, Arc)]
pub trait Mapper: Send + Sync + Debug {
    /// `Ok(None)` means the record is filtered out, not an error.
    fn map(
        &self,
        record: &ChainRecord,
        ctx: &MapperContext<'_>,
    ) -> Result<Option<NormalizedEvent>, HandlerError>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Success,
    Error,
}

/// Outcome of [`Target::publish`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub status: PublishStatus,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl PublishResult {
    pub fn success() -> Self {
        Self {
            status: PublishStatus::Success,
            reasons: vec![],
        }
    }

    pub fn error(reasons: Vec<String>) -> Self {
        Self {
            status: PublishStatus::Error,
            reasons,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Success
    }
}

/// A sink for normalized events.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait Target: Send + Sync + Debug {
    async fn publish(&self, events: &[NormalizedEvent]) -> PublishResult;
}

/// Receives every batch fetched by a polling iteration. A batch is only
/// committed when all handlers of the job return `Ok`.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait Handler: Send + Sync + Debug {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    async fn handle(&self, records: &[ChainRecord]) -> Result<(), HandlerError>;
}
