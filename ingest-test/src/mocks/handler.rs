#![allow(non_snake_case)]

use async_trait::async_trait;
use mockall::*;

use ingest_core::*;

mock! {
    pub Handler {
        pub fn _name(&self) -> &str {}

        pub fn _handle(&self, records: Vec<ChainRecord>) -> Result<(), HandlerError> {}
    }
}

impl std::fmt::Debug for MockHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockHandler")
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn name(&self) -> &str {
        self._name()
    }

    async fn handle(&self, records: &[ChainRecord]) -> Result<(), HandlerError> {
        self._handle(records.to_vec())
    }
}

mock! {
    pub Target {
        pub fn _publish(&self, events: Vec<NormalizedEvent>) -> PublishResult {}
    }
}

impl std::fmt::Debug for MockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockTarget")
    }
}

#[async_trait]
impl Target for MockTarget {
    async fn publish(&self, events: &[NormalizedEvent]) -> PublishResult {
        self._publish(events.to_vec())
    }
}
