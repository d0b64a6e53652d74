use async_trait::async_trait;
use dashmap::DashMap;

use ingest_core::{MetadataResult, MetadataStore};

/// Keeps metadata in memory. Used for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    values: DashMap<String, serde_json::Value>,
}

impl InMemoryMetadataStore {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, key: &str) -> MetadataResult<Option<serde_json::Value>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> MetadataResult<()> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}
