//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a job. Events
//! implement [`InternalEvent`], which records the corresponding metric.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

use crate::commit::TaskCommitState;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a reader yields records.
pub struct RecordsRead {
    pub count: u64,
}

impl InternalEvent for RecordsRead {
    fn emit(self) {
        trace!(count = self.count, "Records read");
        counter!("glacier_records_read_total").increment(self.count);
    }
}

/// Event emitted when a batch reaches the staging area.
pub struct BatchFlushed {
    pub records: u64,
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for BatchFlushed {
    fn emit(self) {
        trace!(
            records = self.records,
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Batch flushed"
        );
        counter!("glacier_batches_flushed_total").increment(1);
        counter!("glacier_records_written_total").increment(self.records);
        counter!("glacier_bytes_written_total").increment(self.bytes);
        histogram!("glacier_batch_flush_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a batch fails to flush.
pub struct BatchFailed;

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!("Batch flush failed");
        counter!("glacier_batches_failed_total").increment(1);
    }
}

/// Event emitted when a task attempt reaches a terminal state.
pub struct TaskAttemptFinished {
    pub state: TaskCommitState,
}

impl InternalEvent for TaskAttemptFinished {
    fn emit(self) {
        trace!(state = %self.state, "Task attempt finished");
        counter!("glacier_task_attempts_total", "state" => self.state.as_str()).increment(1);
    }
}

/// Outcome label for a finished job.
#[derive(Debug, Clone, Copy)]
pub enum JobStatus {
    Visible,
    NotVisible,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Visible => "visible",
            JobStatus::NotVisible => "not_visible",
        }
    }
}

/// Event emitted when the coordinator finalizes a job.
pub struct JobFinished {
    pub status: JobStatus,
    pub duration: Duration,
}

impl InternalEvent for JobFinished {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Job finished"
        );
        counter!("glacier_jobs_total", "status" => self.status.as_str()).increment(1);
        histogram!("glacier_job_commit_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Storage operation type for metrics labeling.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Rename,
    Delete,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Rename => "rename",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
        }
    }
}

/// Request outcome for metrics labeling.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted for every store request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "glacier_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted with the latency of a store request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "glacier_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
