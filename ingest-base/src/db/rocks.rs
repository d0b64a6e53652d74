use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{Options, DB as Rocks};
use tracing::info;

use ingest_core::{MetadataError, MetadataResult, MetadataStore};

/// A rocksdb handle, cheap to clone.
#[derive(Debug, Clone)]
pub struct DB(Arc<Rocks>);

impl From<Rocks> for DB {
    fn from(rocks: Rocks) -> Self {
        Self(Arc::new(rocks))
    }
}

/// DB Error type
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// Rocks DB Error
    #[error("{0}")]
    RockError(#[from] rocksdb::Error),
    /// Error opening the database
    #[error("Failed to open {path}, canonicalized as {canonicalized}: {source}")]
    OpeningError {
        #[source]
        source: rocksdb::Error,
        path: PathBuf,
        canonicalized: PathBuf,
    },
    /// Could not parse the provided database path string
    #[error("Invalid database path supplied {1:?}; {0}")]
    InvalidDbPath(#[source] io::Error, String),
}

impl From<DbError> for MetadataError {
    fn from(err: DbError) -> Self {
        MetadataError::Backend(err.to_string())
    }
}

type Result<T> = std::result::Result<T, DbError>;

impl DB {
    /// Opens db at `db_path` and creates if missing
    #[tracing::instrument(err)]
    pub fn from_path(db_path: &Path) -> Result<DB> {
        let path = {
            let mut path = db_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .canonicalize()
                .map_err(|e| DbError::InvalidDbPath(e, db_path.to_string_lossy().into()))?;
            if let Some(file_name) = db_path.file_name() {
                path.push(file_name);
            }
            path
        };

        if path.is_dir() {
            info!(path=%path.to_string_lossy(), "Opening existing db")
        } else {
            info!(path=%path.to_string_lossy(), "Creating db")
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);

        Rocks::open(&opts, &path)
            .map_err(|e| DbError::OpeningError {
                source: e,
                path: db_path.into(),
                canonicalized: path,
            })
            .map(Into::into)
    }

    /// Store a value in the DB
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.0.put(key, value)?)
    }

    /// Retrieve a value from the DB
    pub fn retrieve(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key)?)
    }
}

/// Metadata kept in rocksdb, keyed by `metadata_<key>`.
#[derive(Debug, Clone)]
pub struct RocksMetadataStore {
    db: DB,
}

impl RocksMetadataStore {
    const PREFIX: &'static str = "metadata_";

    pub fn new(db: DB) -> Self {
        Self { db }
    }

    fn full_key(key: &str) -> Vec<u8> {
        let mut full = Vec::with_capacity(Self::PREFIX.len() + key.len());
        full.extend(Self::PREFIX.as_bytes());
        full.extend(key.as_bytes());
        full
    }
}

#[async_trait]
impl MetadataStore for RocksMetadataStore {
    async fn get(&self, key: &str) -> MetadataResult<Option<serde_json::Value>> {
        match self.db.retrieve(&Self::full_key(key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> MetadataResult<()> {
        let bytes = serde_json::to_vec(&value)?;
        Ok(self.db.store(&Self::full_key(key), &bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn stores_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest_db");
        {
            let store = RocksMetadataStore::new(DB::from_path(&path).unwrap());
            store.save("arbitrum-associated-l1-blocks", json!([[5, 1]])).await.unwrap();
        }
        let store = RocksMetadataStore::new(DB::from_path(&path).unwrap());
        assert_eq!(
            store.get("arbitrum-associated-l1-blocks").await.unwrap(),
            Some(json!([[5, 1]]))
        );
        assert!(store.get("other").await.unwrap().is_none());
    }
}
