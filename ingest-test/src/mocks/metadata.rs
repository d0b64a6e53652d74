#![allow(non_snake_case)]

use async_trait::async_trait;
use mockall::*;
use serde_json::Value;

use ingest_core::*;

mock! {
    pub MetadataStore {
        pub fn _get(&self, key: &str) -> MetadataResult<Option<Value>> {}

        pub fn _save(&self, key: &str, value: Value) -> MetadataResult<()> {}
    }
}

impl std::fmt::Debug for MockMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockMetadataStore")
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn get(&self, key: &str) -> MetadataResult<Option<Value>> {
        self._get(key)
    }

    async fn save(&self, key: &str, value: Value) -> MetadataResult<()> {
        self._save(key, value)
    }
}
