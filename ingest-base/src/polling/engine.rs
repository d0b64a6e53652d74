use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use futures::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use ingest_core::{
    BlockInfo, BlockRange, ChainBlockRepository, ChainCommunicationError, ChainIdentity,
    ChainRecord, Handler, HandlerError, JobDefinition, MetadataError, MetadataStore, PollCursor,
    RecordKind, TypedMetadata,
};

use super::eta_calculator::SyncerEtaCalculator;
use super::{next_range, reached_to_block, NextRange};
use crate::{ChainWatermark, CoreMetrics};

/// Lifecycle of a polling engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    WaitingForChainHead,
    Dispatching,
    Persisting,
    Stopped,
}

/// Result of one successful iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IterationOutcome {
    /// The range was dispatched and the cursor moved to its end
    Committed(BlockRange),
    /// Nothing new on chain
    Waiting { head: u64 },
    /// The configured `toBlock` has been processed
    Done,
}

/// Why a polling loop ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// `stop` was called
    Stopped,
    /// The job processed its last block
    Finished,
}

/// A failed iteration. The cursor is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error(transparent)]
    Chain(#[from] ChainCommunicationError),
    #[error("Handlers failed: {}", .0.iter().map(|(h, e)| format!("{h}: {e}")).join("; "))]
    Handlers(Vec<(String, HandlerError)>),
    #[error("Cursor persistence failed: {0}")]
    Metadata(#[from] MetadataError),
}

impl IterationError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            IterationError::Chain(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Metrics updated by the polling loops.
#[derive(Clone, Debug, new)]
pub struct PollingMetrics {
    job_executions: IntCounterVec,
    jobs_running: IntGaugeVec,
    chain_height: IntGaugeVec,
    cursor: IntGaugeVec,
    sync_eta: GaugeVec,
    handler_failures: IntCounterVec,
}

impl From<&CoreMetrics> for PollingMetrics {
    fn from(metrics: &CoreMetrics) -> Self {
        Self::new(
            metrics.job_executions(),
            metrics.jobs_running(),
            metrics.chain_height(),
            metrics.cursor(),
            metrics.sync_eta(),
            metrics.handler_failures(),
        )
    }
}

/// Time window of the sync ETA moving average, in seconds.
const ETA_TIME_WINDOW: f64 = 120.;

#[derive(Debug, Default)]
struct CursorState {
    loaded: bool,
    last_block: Option<u64>,
}

/// Polls one job: computes the next range, fetches its records through the
/// chain repository, hands them to every handler and commits the cursor once
/// all handlers succeeded.
pub struct PollingEngine {
    job: JobDefinition,
    chain: ChainIdentity,
    repository: Arc<dyn ChainBlockRepository>,
    handlers: Vec<Arc<dyn Handler>>,
    cursor_store: TypedMetadata<PollCursor>,
    cursor: Mutex<CursorState>,
    eta: Mutex<Option<SyncerEtaCalculator>>,
    metrics: PollingMetrics,
    watermark: Option<Arc<ChainWatermark>>,
    state: watch::Sender<EngineState>,
    stopped: AtomicBool,
    wake: Notify,
}

impl Debug for PollingEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEngine")
            .field("job", &self.job.id)
            .field("chain", &self.chain)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl PollingEngine {
    pub fn new(
        job: JobDefinition,
        repository: Arc<dyn ChainBlockRepository>,
        handlers: Vec<Arc<dyn Handler>>,
        metadata: Arc<dyn MetadataStore>,
        metrics: PollingMetrics,
        watermark: Option<Arc<ChainWatermark>>,
    ) -> Self {
        let chain = repository.chain().clone();
        let cursor_store = TypedMetadata::new(metadata, job.id.clone());
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            job,
            chain,
            repository,
            handlers,
            cursor_store,
            cursor: Default::default(),
            eta: Default::default(),
            metrics,
            watermark,
            state,
            stopped: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    pub fn chain(&self) -> &ChainIdentity {
        &self.chain
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Last committed block, as loaded or written by this engine.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor.lock().last_block
    }

    /// Ask the loop to end. The current iteration completes; a pending sleep
    /// is cut short.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn labels(&self) -> [&str; 2] {
        [&self.job.id, self.chain.name()]
    }

    /// Run iterations until stopped or finished. Iteration errors are logged
    /// and followed by the regular sleep; they never end the loop.
    pub async fn run(&self) -> RunOutcome {
        let span = info_span!("PollingEngine", job = %self.job.id, chain = %self.chain);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> RunOutcome {
        let interval = self.job.source.config.interval();
        self.set_state(EngineState::Running);
        self.metrics
            .jobs_running
            .with_label_values(&self.labels())
            .set(1);
        info!(action = ?self.job.source.action, "Starting polling loop");

        let outcome = loop {
            if self.is_stopping() {
                break RunOutcome::Stopped;
            }

            let delay = match self.iterate().await {
                Ok(IterationOutcome::Done) => {
                    info!(cursor = ?self.cursor(), "Reached the configured last block");
                    break RunOutcome::Finished;
                }
                Ok(IterationOutcome::Committed(range)) => {
                    debug!(%range, "Committed range");
                    interval
                }
                Ok(IterationOutcome::Waiting { head }) => {
                    debug!(head, cursor = ?self.cursor(), "Waiting for the chain head to advance");
                    interval
                }
                Err(e) => {
                    warn!(error = %e, cursor = ?self.cursor(), "Polling iteration failed");
                    e.retry_after().map_or(interval, |r| r.max(interval))
                }
            };

            if self.is_stopping() {
                break RunOutcome::Stopped;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        };

        self.metrics
            .jobs_running
            .with_label_values(&self.labels())
            .set(0);
        self.set_state(EngineState::Stopped);
        info!(?outcome, "Polling loop ended");
        outcome
    }

    async fn load_cursor(&self) -> Result<Option<u64>, MetadataError> {
        if self.cursor.lock().loaded {
            return Ok(self.cursor());
        }
        let last_block = self.cursor_store.load().await?.map(|c| c.last_block);
        let mut state = self.cursor.lock();
        state.loaded = true;
        state.last_block = last_block;
        if let Some(last_block) = last_block {
            if let Some(watermark) = &self.watermark {
                watermark.observe(last_block);
            }
            self.metrics
                .cursor
                .with_label_values(&self.labels())
                .set(gauge_value(last_block));
        }
        Ok(last_block)
    }

    fn count(&self, outcome: &str) {
        self.metrics
            .job_executions
            .with_label_values(&[&self.job.id, self.chain.name(), outcome])
            .inc();
    }

    /// One pass of the loop: fetch the next range, dispatch it and commit the
    /// cursor.
    #[instrument(skip(self), fields(job = %self.job.id, chain = %self.chain), level = "debug")]
    pub async fn iterate(&self) -> Result<IterationOutcome, IterationError> {
        let res = self.iterate_inner().await;
        let outcome = match &res {
            Ok(IterationOutcome::Committed(_)) => "committed",
            Ok(IterationOutcome::Waiting { .. }) => "waiting",
            Ok(IterationOutcome::Done) => "done",
            Err(_) => "failed",
        };
        self.count(outcome);
        if matches!(res, Ok(IterationOutcome::Committed(_)) | Err(_)) {
            self.set_state(EngineState::Running);
        }
        res
    }

    async fn iterate_inner(&self) -> Result<IterationOutcome, IterationError> {
        let config = &self.job.source.config;
        let cursor = self.load_cursor().await?;
        if reached_to_block(cursor, config) {
            return Ok(IterationOutcome::Done);
        }

        let commitment = config.commitment();
        let head = self.repository.get_block_height(commitment).await?;
        self.metrics
            .chain_height
            .with_label_values(&self.labels())
            .set(gauge_value(head));

        let range = match next_range(cursor, config, head) {
            NextRange::Fetch(range) => range,
            NextRange::Wait => {
                self.set_state(EngineState::WaitingForChainHead);
                return Ok(IterationOutcome::Waiting { head });
            }
            NextRange::Done => return Ok(IterationOutcome::Done),
        };

        let mut records: Vec<ChainRecord> = match self.job.source.action.record_kind() {
            RecordKind::Logs => self
                .repository
                .get_filtered_logs(range, &config.filter)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
            RecordKind::Transactions => self
                .repository
                .get_transactions(range, &config.filter, commitment)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
        };
        self.attach_block_times(&mut records).await?;

        self.set_state(EngineState::Dispatching);
        self.dispatch(&records).await?;

        self.set_state(EngineState::Persisting);
        self.commit(range.to(), head).await?;
        debug!(%range, records = records.len(), "Processed range");
        Ok(IterationOutcome::Committed(range))
    }

    /// Set the block time of every record which does not carry one yet,
    /// joining on block hash, or on number when the record has no hash.
    async fn attach_block_times(&self, records: &mut [ChainRecord]) -> Result<(), IterationError> {
        let numbers = records
            .iter()
            .filter(|r| r.block_time().is_none())
            .map(|r| r.block_number())
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        if numbers.is_empty() {
            return Ok(());
        }

        let blocks = self
            .repository
            .get_blocks(&numbers, self.job.source.config.commitment())
            .await?;
        let by_hash: HashMap<String, &BlockInfo> = blocks
            .iter()
            .map(|(hash, block)| (hash.to_ascii_lowercase(), block))
            .collect();
        let by_number: HashMap<u64, &BlockInfo> =
            blocks.values().map(|block| (block.number, block)).collect();

        for record in records.iter_mut().filter(|r| r.block_time().is_none()) {
            let block = match record.block_hash() {
                Some(hash) => by_hash.get(&hash.to_ascii_lowercase()).copied(),
                None => by_number.get(&record.block_number()).copied(),
            };
            match block {
                Some(block) => record.attach_block(block),
                None => {
                    return Err(ChainCommunicationError::Transient(format!(
                        "block {} ({}) of record {} is not available",
                        record.block_number(),
                        record.block_hash().unwrap_or("no hash"),
                        record.tx_hash()
                    ))
                    .into())
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, records: &[ChainRecord]) -> Result<(), IterationError> {
        let results = join_all(self.handlers.iter().map(|h| h.handle(records))).await;
        let failures = self
            .handlers
            .iter()
            .zip(results)
            .filter_map(|(handler, res)| res.err().map(|e| (handler.name().to_owned(), e)))
            .collect::<Vec<_>>();

        if failures.is_empty() {
            return Ok(());
        }
        for (handler, error) in &failures {
            warn!(handler, %error, "Handler failed");
            self.metrics
                .handler_failures
                .with_label_values(&[&self.job.id, handler])
                .inc();
        }
        Err(IterationError::Handlers(failures))
    }

    async fn commit(&self, last_block: u64, head: u64) -> Result<(), MetadataError> {
        self.cursor_store.store(&PollCursor::new(last_block)).await?;
        self.cursor.lock().last_block = Some(last_block);
        if let Some(watermark) = &self.watermark {
            watermark.observe(last_block);
        }

        let labels = self.labels();
        self.metrics
            .cursor
            .with_label_values(&labels)
            .set(gauge_value(last_block));
        let eta = self
            .eta
            .lock()
            .get_or_insert_with(|| SyncerEtaCalculator::new(last_block, head, ETA_TIME_WINDOW))
            .calculate(last_block, head);
        self.metrics
            .sync_eta
            .with_label_values(&labels)
            .set(eta.as_secs_f64());
        Ok(())
    }
}

fn gauge_value(height: u64) -> i64 {
    height.try_into().unwrap_or(i64::MAX)
}
