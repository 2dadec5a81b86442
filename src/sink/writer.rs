//! Batching record writer for one task attempt.

use bytes::BytesMut;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::traits::BatchSink;
use crate::commit::{CommitCoordinator, StagedBatch, TaskAttemptId, TaskCommitState};
use crate::config::JobConfig;
use crate::emit;
use crate::error::{ConfigError, FlushSnafu, PoisonedSnafu, RegisterSnafu, WriteError};
use crate::metrics::events::{BatchFailed, BatchFlushed};
use crate::record::{Record, RecordSerde};

/// When a buffered batch is flushed. Whichever limit is reached first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub entries: usize,
    pub bytes: usize,
}

impl BatchLimits {
    pub fn from_config(config: &JobConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            entries: config.batch_size_entries()?,
            bytes: config.batch_size_bytes()?,
        })
    }

    fn reached(&self, records: usize, bytes: usize) -> bool {
        records >= self.entries || bytes >= self.bytes
    }
}

/// Counters for one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Records accepted by `write`.
    pub records: usize,
    /// Batches successfully staged.
    pub batches: usize,
    /// Encoded bytes successfully staged.
    pub bytes: usize,
}

/// Buffers records and stages them in batches for one task attempt.
///
/// `close` commits the attempt through the coordinator; `abort` discards it.
/// After a failed flush the writer is poisoned and can only be aborted.
pub struct RecordWriter {
    attempt: TaskAttemptId,
    coordinator: Arc<CommitCoordinator>,
    sink: Box<dyn BatchSink>,
    serde: RecordSerde,
    limits: BatchLimits,
    buffer: BytesMut,
    buffered: usize,
    staged: Vec<StagedBatch>,
    stats: WriterStats,
    poisoned: bool,
}

impl RecordWriter {
    /// Register `attempt` with the coordinator and return a writer for it.
    pub async fn start(
        attempt: TaskAttemptId,
        coordinator: Arc<CommitCoordinator>,
        sink: Box<dyn BatchSink>,
        limits: BatchLimits,
    ) -> Result<Self, WriteError> {
        coordinator
            .setup_task(attempt)
            .await
            .context(RegisterSnafu)?;
        debug!(job = coordinator.job_id(), %attempt, ?limits, "Opened record writer");

        Ok(Self {
            attempt,
            coordinator,
            sink,
            serde: RecordSerde,
            limits,
            buffer: BytesMut::new(),
            buffered: 0,
            staged: Vec::new(),
            stats: WriterStats::default(),
            poisoned: false,
        })
    }

    pub fn attempt(&self) -> TaskAttemptId {
        self.attempt
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Buffer one record, flushing if a batch limit is reached.
    pub async fn write(&mut self, record: &Record) -> Result<(), WriteError> {
        ensure!(!self.poisoned, PoisonedSnafu);

        let before = self.buffer.len();
        if let Err(source) = self.serde.encode(record, &mut self.buffer) {
            self.buffer.truncate(before);
            return Err(WriteError::Serialize { source });
        }
        self.buffered += 1;
        self.stats.records += 1;

        if self.limits.reached(self.buffered, self.buffer.len()) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Stage whatever is buffered as one batch.
    pub async fn flush(&mut self) -> Result<(), WriteError> {
        ensure!(!self.poisoned, PoisonedSnafu);
        if self.buffered == 0 {
            return Ok(());
        }

        let start = Instant::now();
        let payload = self.buffer.split().freeze();
        let records = std::mem::take(&mut self.buffered);
        let seq = self.stats.batches;

        match self.sink.write_batch(seq, records, payload).await {
            Ok(batch) => {
                self.stats.batches += 1;
                self.stats.bytes += batch.bytes;
                emit!(BatchFlushed {
                    records: records as u64,
                    bytes: batch.bytes as u64,
                    duration: start.elapsed(),
                });
                debug!(attempt = %self.attempt, seq, records, bytes = batch.bytes, "Staged batch");
                self.staged.push(batch);
                Ok(())
            }
            Err(source) => {
                self.poisoned = true;
                emit!(BatchFailed);
                Err(source).context(FlushSnafu {
                    batch: seq,
                    records,
                })
            }
        }
    }

    /// Flush the remaining batch and commit the attempt.
    ///
    /// Returns `Committed` only if every flush and the task commit succeeded;
    /// otherwise the staged output is discarded and `Aborted` is returned.
    pub async fn close(mut self) -> TaskCommitState {
        if self.poisoned {
            warn!(attempt = %self.attempt, "Closing poisoned writer, aborting attempt");
            return self.abort().await;
        }
        if let Err(e) = self.flush().await {
            warn!(attempt = %self.attempt, error = %e, "Final flush failed, aborting attempt");
            return self.abort().await;
        }

        let staged = std::mem::take(&mut self.staged);
        match self.coordinator.commit_task(self.attempt, staged).await {
            Ok(()) => {
                info!(
                    attempt = %self.attempt,
                    records = self.stats.records,
                    batches = self.stats.batches,
                    bytes = self.stats.bytes,
                    "Task attempt committed"
                );
                TaskCommitState::Committed
            }
            Err(e) => {
                warn!(attempt = %self.attempt, error = %e, "Task commit failed");
                // A refused commit usually leaves the attempt aborted already.
                if self.coordinator.state(self.attempt).await == Some(TaskCommitState::Pending) {
                    return self.abort().await;
                }
                TaskCommitState::Aborted
            }
        }
    }

    /// Drop buffered records and discard everything staged so far.
    pub async fn abort(mut self) -> TaskCommitState {
        self.buffer.clear();
        self.buffered = 0;
        self.staged.clear();
        if let Err(e) = self.coordinator.abort_task(self.attempt).await {
            warn!(attempt = %self.attempt, error = %e, "Failed to abort task attempt");
        }
        TaskCommitState::Aborted
    }
}
