use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::info;

use ingest_core::{NormalizedEvent, PublishResult, Target};

/// Name of the target writing events to the log.
pub const LOG_TARGET: &str = "log";
/// Name of the target appending events to a JSON lines file.
pub const JSONL_TARGET: &str = "jsonl";

/// Writes every event to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTarget;

#[async_trait]
impl Target for LogTarget {
    async fn publish(&self, events: &[NormalizedEvent]) -> PublishResult {
        for event in events {
            match event.to_json() {
                Ok(json) => info!(
                    event = %event.name,
                    chain_id = event.chain_id,
                    block_height = event.block_height,
                    tx_hash = %event.tx_hash,
                    payload = %json,
                    "Event"
                ),
                Err(e) => return PublishResult::error(vec![e.to_string()]),
            }
        }
        PublishResult::success()
    }
}

/// Appends events, one JSON object per line, to a file.
#[derive(Debug)]
pub struct JsonlTarget {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, events: &[NormalizedEvent]) -> eyre::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, &event.to_json()?)?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Target for JsonlTarget {
    async fn publish(&self, events: &[NormalizedEvent]) -> PublishResult {
        match self.append(events).await {
            Ok(()) => PublishResult::success(),
            Err(e) => PublishResult::error(vec![format!(
                "cannot append to {}: {e}",
                self.path.display()
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(height: u64) -> NormalizedEvent {
        NormalizedEvent {
            name: "raw-record".into(),
            chain_id: 1,
            tx_hash: format!("sig{height}"),
            block_height: height,
            block_time: 1_700_000_000,
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let target = JsonlTarget::new(dir.path().join("events.jsonl"));

        assert!(target.publish(&[event(1), event(2)]).await.is_success());
        assert!(target.publish(&[event(3)]).await.is_success());

        let content = std::fs::read_to_string(target.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: NormalizedEvent = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last.block_height, 3);
    }

    #[tokio::test]
    async fn unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = JsonlTarget::new(dir.path().join("missing").join("events.jsonl"));
        let result = target.publish(&[event(1)]).await;
        assert!(!result.is_success());
        assert_eq!(result.reasons.len(), 1);
    }
}
