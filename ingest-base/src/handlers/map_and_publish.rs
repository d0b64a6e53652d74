use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use ingest_core::{
    ChainIdentity, ChainRecord, Handler, HandlerError, Mapper, MapperContext, Target,
};

/// Maps every record with a mapper and publishes the resulting events to a
/// target in one call. The batch fails unless the target reports success.
#[derive(Debug)]
pub struct MapAndPublishHandler {
    name: String,
    job_id: String,
    chain: ChainIdentity,
    mapper_name: String,
    mapper: Arc<dyn Mapper>,
    target_name: String,
    target: Arc<dyn Target>,
    config: serde_json::Value,
}

impl MapAndPublishHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        job_id: impl Into<String>,
        chain: ChainIdentity,
        mapper_name: impl Into<String>,
        mapper: Arc<dyn Mapper>,
        target_name: impl Into<String>,
        target: Arc<dyn Target>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            job_id: job_id.into(),
            chain,
            mapper_name: mapper_name.into(),
            mapper,
            target_name: target_name.into(),
            target,
            config,
        }
    }
}

#[async_trait]
impl Handler for MapAndPublishHandler {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(job = %self.job_id, handler = %self.name, records = records.len()))]
    async fn handle(&self, records: &[ChainRecord]) -> Result<(), HandlerError> {
        let ctx = MapperContext {
            job_id: &self.job_id,
            chain: &self.chain,
            config: &self.config,
        };
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            if let Some(event) = self.mapper.map(record, &ctx)? {
                events.push(event);
            }
        }
        if events.is_empty() {
            debug!(mapper = %self.mapper_name, "Nothing to publish");
            return Ok(());
        }

        let result = self.target.publish(&events).await;
        if result.is_success() {
            debug!(target = %self.target_name, events = events.len(), "Published events");
            Ok(())
        } else {
            Err(HandlerError::Publish {
                target: self.target_name.clone(),
                reasons: result.reasons,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use ingest_core::{KnownChain, PublishResult};
    use ingest_test::{mocks::MockTarget, test_utils::log_at};
    use serde_json::json;

    use super::*;
    use crate::handlers::RawMapper;

    fn handler(target: MockTarget) -> MapAndPublishHandler {
        MapAndPublishHandler::new(
            "HandleEvmLogs:mock",
            "poll-ethereum",
            KnownChain::Ethereum.into(),
            "raw",
            Arc::new(RawMapper),
            "mock",
            Arc::new(target),
            json!({ "eventName": "log-message-published" }),
        )
    }

    fn timed_log(number: u64) -> ChainRecord {
        let mut log = log_at(number, 0);
        log.block_time = Some(1_700_000_000 + number);
        log.into()
    }

    #[tokio::test]
    async fn publishes_mapped_events() {
        let mut target = MockTarget::new();
        target
            .expect__publish()
            .times(1)
            .withf(|events| {
                events.len() == 2
                    && events[0].name == "log-message-published"
                    && events[0].chain_id == 2
                    && events[1].block_height == 11
            })
            .returning(|_| PublishResult::success());

        handler(target)
            .handle(&[timed_log(10), timed_log(11)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn target_error_fails_the_batch() {
        let mut target = MockTarget::new();
        target
            .expect__publish()
            .returning(|_| PublishResult::error(vec!["queue full".into()]));

        let err = handler(target).handle(&[timed_log(10)]).await.unwrap_err();
        assert!(matches!(err, HandlerError::Publish { reasons, .. } if reasons == ["queue full"]));
    }

    #[tokio::test]
    async fn empty_batch_is_not_published() {
        let mut target = MockTarget::new();
        target.expect__publish().never();
        handler(target).handle(&[]).await.unwrap();
    }
}
