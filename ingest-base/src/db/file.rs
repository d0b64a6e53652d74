use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use ingest_core::{MetadataResult, MetadataStore};

/// Stores each key as `<dir>/<key>.json`. Writes go to a temporary file which
/// is then renamed over the previous value, so a crash never leaves a
/// truncated value behind.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Use `dir`, creating it when missing.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            info!(path = %dir.display(), "Creating metadata directory");
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '_',
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl MetadataStore for FileMetadataStore {
    async fn get(&self, key: &str) -> MetadataResult<Option<serde_json::Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> MetadataResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&value)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, path = %path.display(), "Saved metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ingest_core::{PollCursor, TypedMetadata};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileMetadataStore::open(dir.path().join("meta")).unwrap();
            store
                .save("poll-evm-ethereum", json!({ "lastBlock": "10" }))
                .await
                .unwrap();
        }
        let store: Arc<dyn MetadataStore> =
            Arc::new(FileMetadataStore::open(dir.path().join("meta")).unwrap());
        let cursor = TypedMetadata::<PollCursor>::new(store, "poll-evm-ethereum")
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cursor.last_block, 10);
    }

    #[tokio::test]
    async fn missing_key_is_none_and_keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path()).unwrap();
        assert!(store.get("nothing").await.unwrap().is_none());

        store.save("a/b c", json!(1)).await.unwrap();
        assert!(dir.path().join("a_b_c.json").is_file());
        assert_eq!(store.get("a/b c").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path()).unwrap();
        store.save("k", json!({ "v": 1 })).await.unwrap();
        store.save("k", json!({ "v": 2 })).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({ "v": 2 })));
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
