use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use auto_impl::auto_impl;
use serde::{de::DeserializeOwned, Serialize};

/// Errors from a metadata backend
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Filesystem failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Stored value could not be (de)serialized
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Failure inside the storage engine
    #[error("Metadata backend error: {0}")]
    Backend(String),
}

/// Result of a metadata operation
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Durable key-value storage for cursors and other per-job or per-chain
/// state. Values survive process restarts.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait MetadataStore: Send + Sync + Debug {
    /// Value stored under `key`, if any.
    async fn get(&self, key: &str) -> MetadataResult<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing what was there.
    async fn save(&self, key: &str, value: serde_json::Value) -> MetadataResult<()>;
}

/// Typed view of one key of a [`MetadataStore`].
#[derive(Debug)]
pub struct TypedMetadata<T> {
    store: Arc<dyn MetadataStore>,
    key: String,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedMetadata<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> TypedMetadata<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(store: Arc<dyn MetadataStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _phantom: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> MetadataResult<Option<T>> {
        match self.store.get(&self.key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn store(&self, value: &T) -> MetadataResult<()> {
        self.store
            .save(&self.key, serde_json::to_value(value)?)
            .await
    }
}
