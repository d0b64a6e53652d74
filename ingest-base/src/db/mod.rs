//! Implementations of [`ingest_core::MetadataStore`].

use std::path::PathBuf;
use std::sync::Arc;

use eyre::Result;
use serde::Deserialize;

pub use file::*;
pub use memory::*;
pub use rocks::*;

use ingest_core::MetadataStore;

mod file;
mod memory;
mod rocks;

/// Where job cursors and other metadata are persisted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConf {
    /// One JSON file per key under `path`
    File { path: PathBuf },
    /// A rocksdb database at `path`
    Rocksdb { path: PathBuf },
    /// Nothing survives a restart
    Memory,
}

impl Default for MetadataConf {
    fn default() -> Self {
        MetadataConf::File {
            path: PathBuf::from("./metadata"),
        }
    }
}

impl MetadataConf {
    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn MetadataStore>> {
        Ok(match self {
            MetadataConf::File { path } => Arc::new(FileMetadataStore::open(path)?),
            MetadataConf::Rocksdb { path } => Arc::new(RocksMetadataStore::new(DB::from_path(path)?)),
            MetadataConf::Memory => Arc::new(InMemoryMetadataStore::default()),
        })
    }
}
