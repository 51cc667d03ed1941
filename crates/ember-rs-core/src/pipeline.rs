//! Background compaction pipeline.
//!
//! A single worker task owns the conversation buffer and is the only writer of
//! the durable store. Callers talk to it through a bounded job queue: turns are
//! enqueued with a short timeout, manual compaction and rollback are submitted
//! as jobs and answered over a oneshot channel. Buffer statistics are published
//! through a `watch` channel after every job.

use crate::compactor::Compactor;
use crate::error::PipelineError;
use crate::validation::validate_candidate;
use chrono::{DateTime, Utc};
use ember_rs_config::EmberConfig;
use ember_rs_memory::{
    BufferLimits, ConversationBuffer, DurableStore, MemoryDocument, Role, StoreError, Turn,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Tunables for a [`MemoryPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub buffer: BufferLimits,
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub compaction_threshold: usize,
    pub max_document_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&EmberConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &EmberConfig) -> Self {
        Self {
            buffer: BufferLimits {
                max_messages: config.buffer.max_messages,
                max_size_bytes: config.buffer.max_size_bytes,
            },
            queue_capacity: config.pipeline.queue_capacity.max(1),
            enqueue_timeout: Duration::from_millis(config.pipeline.enqueue_timeout_ms),
            compaction_threshold: config.pipeline.compaction_threshold,
            max_document_bytes: config.pipeline.max_document_bytes,
        }
    }
}

/// Snapshot of the worker-owned buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub count: usize,
    pub size_bytes: usize,
    /// Time of the last committed compaction, if any.
    pub last_commit: Option<DateTime<Utc>>,
}

/// What a compaction cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionOutcome {
    /// A new document was validated and committed.
    Committed,
    /// Nothing was buffered, so nothing was merged.
    Skipped,
}

/// Result of a successful compaction cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub outcome: CompactionOutcome,
    /// Buffered turns merged into the document.
    pub turns_merged: usize,
    /// Canonical size of the committed document.
    pub document_bytes: usize,
    pub memories: usize,
}

impl CompactionReport {
    fn skipped() -> Self {
        Self {
            outcome: CompactionOutcome::Skipped,
            turns_merged: 0,
            document_bytes: 0,
            memories: 0,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

enum Job {
    Turn(Turn),
    Compact(Reply<CompactionReport>),
    Rollback { version: usize, reply: Reply<()> },
}

/// Cloneable caller-side handle to the memory worker.
///
/// The worker exits once every handle has been dropped.
#[derive(Clone)]
pub struct MemoryPipeline {
    jobs: mpsc::Sender<Job>,
    stats: watch::Receiver<BufferStats>,
    store: Arc<DurableStore>,
    enqueue_timeout: Duration,
}

/// Owner handle for the worker task.
#[derive(Debug)]
pub struct WorkerHandle {
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wait for the worker to drain its queue and exit.
    pub async fn join(self) -> Result<(), PipelineError> {
        self.task.await.map_err(|err| {
            error!("memory worker terminated abnormally (error={err})");
            PipelineError::WorkerStopped
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl MemoryPipeline {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(
        store: Arc<DurableStore>,
        compactor: Arc<dyn Compactor>,
        settings: PipelineSettings,
    ) -> (Self, WorkerHandle) {
        let (jobs_tx, jobs_rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(BufferStats::default());
        let enqueue_timeout = settings.enqueue_timeout;
        let worker = Worker {
            buffer: ConversationBuffer::new(settings.buffer),
            store: store.clone(),
            compactor,
            settings,
            stats: stats_tx,
            last_commit: None,
        };
        let task = tokio::spawn(worker.run(jobs_rx));
        info!("memory worker started");
        (
            Self {
                jobs: jobs_tx,
                stats: stats_rx,
                store,
                enqueue_timeout,
            },
            WorkerHandle { task },
        )
    }

    /// Enqueue a conversation turn.
    ///
    /// Waits at most the enqueue timeout for queue space; on timeout the turn
    /// is dropped and [`PipelineError::QueueFull`] returned.
    pub async fn add_conversation(
        &self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), PipelineError> {
        let turn = Turn::new(role, content);
        match self
            .jobs
            .send_timeout(Job::Turn(turn), self.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    "ingestion queue full, turn dropped (timeout_ms={})",
                    self.enqueue_timeout.as_millis()
                );
                Err(PipelineError::QueueFull)
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(PipelineError::WorkerStopped),
        }
    }

    /// Run a compaction cycle now, serialized with all other worker jobs.
    pub async fn update_memory(&self) -> Result<CompactionReport, PipelineError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Compact(reply)).await?;
        response.await.map_err(|_| PipelineError::WorkerStopped)?
    }

    /// Restore backup `version` over the active document.
    pub async fn rollback_to_backup(&self, version: usize) -> Result<(), PipelineError> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Rollback { version, reply }).await?;
        response.await.map_err(|_| PipelineError::WorkerStopped)?
    }

    async fn submit(&self, job: Job) -> Result<(), PipelineError> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| PipelineError::WorkerStopped)
    }

    /// Current active document (empty document if none committed).
    pub fn get_memory_package(&self) -> Result<MemoryDocument, PipelineError> {
        Ok(self.store.read_memory()?)
    }

    pub fn buffer_stats(&self) -> BufferStats {
        *self.stats.borrow()
    }

    /// Wait until the published stats change.
    pub async fn stats_changed(&mut self) -> Result<BufferStats, PipelineError> {
        self.stats
            .changed()
            .await
            .map_err(|_| PipelineError::WorkerStopped)?;
        Ok(*self.stats.borrow_and_update())
    }

    pub fn conversation_count(&self) -> usize {
        self.buffer_stats().count
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_stats().size_bytes
    }

    pub fn is_buffer_empty(&self) -> bool {
        self.buffer_stats().count == 0
    }

    pub fn free_space(&self) -> Result<u64, PipelineError> {
        Ok(self.store.free_space()?)
    }

    pub fn used_space(&self) -> Result<u64, PipelineError> {
        Ok(self.store.used_space()?)
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }
}

struct Worker {
    buffer: ConversationBuffer,
    store: Arc<DurableStore>,
    compactor: Arc<dyn Compactor>,
    settings: PipelineSettings,
    stats: watch::Sender<BufferStats>,
    last_commit: Option<DateTime<Utc>>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::Receiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Turn(turn) => self.ingest(turn).await,
                Job::Compact(reply) => {
                    let result = self.update_memory().await;
                    self.publish();
                    let _ = reply.send(result);
                }
                Job::Rollback { version, reply } => {
                    let result = self.store.rollback_to_backup(version).map_err(|err| {
                        error!("rollback failed (version={version}, error={err})");
                        PipelineError::from(err)
                    });
                    let _ = reply.send(result);
                }
            }
            self.publish();
        }
        info!("memory worker stopped");
    }

    async fn ingest(&mut self, turn: Turn) {
        self.buffer.add(turn);
        self.publish();
        if self.buffer.len() < self.settings.compaction_threshold {
            return;
        }
        info!(
            "compaction threshold reached (count={}, threshold={})",
            self.buffer.len(),
            self.settings.compaction_threshold
        );
        // threshold cycles have no caller; the error is already logged
        let _ = self.update_memory().await;
    }

    /// One compaction cycle; the buffer is cleared only after a successful commit.
    async fn update_memory(&mut self) -> Result<CompactionReport, PipelineError> {
        if self.buffer.is_empty() {
            debug!("compaction skipped, buffer empty");
            return Ok(CompactionReport::skipped());
        }
        let turns = self.buffer.len();
        match self.compact_once().await {
            Ok(report) => {
                self.buffer.clear();
                self.last_commit = Some(Utc::now());
                info!(
                    "compaction committed (turns={}, bytes={}, memories={})",
                    turns, report.document_bytes, report.memories
                );
                Ok(report)
            }
            Err(err) => {
                error!("compaction aborted, buffer kept (turns={turns}, error={err})");
                Err(err)
            }
        }
    }

    async fn compact_once(&self) -> Result<CompactionReport, PipelineError> {
        let old_json = self.old_document_text()?;
        let transcript = self.buffer.render();
        debug!(
            "requesting compaction (old_bytes={}, transcript_bytes={})",
            old_json.len(),
            transcript.len()
        );
        let raw = self.compactor.compact(&old_json, &transcript).await?;
        let candidate = validate_candidate(&raw, self.settings.max_document_bytes)?;
        self.store.write_memory(&candidate)?;
        Ok(CompactionReport {
            outcome: CompactionOutcome::Committed,
            turns_merged: self.buffer.len(),
            document_bytes: candidate.serialized_len()?,
            memories: candidate.memories.len(),
        })
    }

    /// Text of the current document handed to the compactor.
    ///
    /// A corrupt active blob is passed through raw so the cycle can still
    /// replace it; the store backs it up on the next write.
    fn old_document_text(&self) -> Result<String, PipelineError> {
        match self.store.read_memory() {
            Ok(document) => Ok(document.to_json()?),
            Err(StoreError::Corrupt(reason)) => {
                error!(
                    "active memory document is corrupt, compacting from raw text (error={reason})"
                );
                match self.store.read_raw_memory()? {
                    Some(raw) if !raw.trim().is_empty() => Ok(raw),
                    _ => Ok(MemoryDocument::empty().to_json()?),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn publish(&self) {
        let stats = BufferStats {
            count: self.buffer.len(),
            size_bytes: self.buffer.size_bytes(),
            last_commit: self.last_commit,
        };
        self.stats.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }
}
