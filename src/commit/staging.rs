//! Staging area for uncommitted output.
//!
//! ```text
//! {index}/{type}/
//! ├── _staging/{job}/{task:05}/
//! │   ├── attempt-{n}/batch-{seq:06}.ndjson   # written by the task attempt
//! │   └── committed/batch-{seq:06}.ndjson     # after task commit
//! └── segments/{job}-{task:05}-{seq:06}.ndjson  # after job commit
//! ```
//!
//! Readers only see segments named by the commit log, so nothing here is
//! visible until the coordinator appends a log entry.

use bytes::Bytes;
use object_store::path::Path;
use tracing::debug;

use super::log::SegmentMeta;
use super::state::TaskAttemptId;
use crate::storage::StorageProvider;
use crate::error::StorageError;

const STAGING_DIR: &str = "_staging";
pub(crate) const SEGMENTS_DIR: &str = "segments";

/// A batch persisted to the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    /// Path relative to the resource prefix.
    pub path: Path,
    pub seq: usize,
    pub records: usize,
    pub bytes: usize,
}

/// One job's staging area on one store connection.
#[derive(Debug, Clone)]
pub struct StagingArea {
    storage: StorageProvider,
    job_id: String,
}

impl StagingArea {
    /// `storage` must be scoped to the resource prefix.
    pub fn new(storage: StorageProvider, job_id: impl Into<String>) -> Self {
        Self {
            storage,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn job_dir(&self) -> Path {
        Path::from(format!("{STAGING_DIR}/{}", self.job_id))
    }

    fn attempt_dir(&self, attempt: TaskAttemptId) -> Path {
        Path::from(format!(
            "{STAGING_DIR}/{}/{:05}/attempt-{}",
            self.job_id, attempt.task, attempt.attempt
        ))
    }

    fn committed_dir(&self, task: u32) -> Path {
        Path::from(format!("{STAGING_DIR}/{}/{task:05}/committed", self.job_id))
    }

    fn batch_path(dir: &Path, seq: usize) -> Path {
        dir.child(format!("batch-{seq:06}.ndjson"))
    }

    /// Persist one encoded batch for `attempt`.
    pub async fn write_batch(
        &self,
        attempt: TaskAttemptId,
        seq: usize,
        records: usize,
        payload: Bytes,
    ) -> Result<StagedBatch, StorageError> {
        let path = Self::batch_path(&self.attempt_dir(attempt), seq);
        let bytes = payload.len();
        self.storage.put(&path, payload).await?;
        Ok(StagedBatch {
            path,
            seq,
            records,
            bytes,
        })
    }

    /// Delete everything `attempt` staged.
    pub async fn discard_attempt(&self, attempt: TaskAttemptId) -> Result<usize, StorageError> {
        let removed = self.storage.delete_prefix(&self.attempt_dir(attempt)).await?;
        debug!(job = %self.job_id, %attempt, removed, "Discarded attempt output");
        Ok(removed)
    }

    /// Delete a task's committed area.
    pub async fn discard_committed(&self, task: u32) -> Result<usize, StorageError> {
        self.storage.delete_prefix(&self.committed_dir(task)).await
    }

    /// Move an attempt's batches into its task's committed area.
    pub async fn promote_attempt(
        &self,
        attempt: TaskAttemptId,
        batches: &[StagedBatch],
    ) -> Result<Vec<StagedBatch>, StorageError> {
        let committed = self.committed_dir(attempt.task);
        // Leftovers from a promotion that failed halfway.
        self.storage.delete_prefix(&committed).await?;

        let mut promoted = Vec::with_capacity(batches.len());
        for batch in batches {
            let target = Self::batch_path(&committed, batch.seq);
            self.storage.rename(&batch.path, &target).await?;
            promoted.push(StagedBatch {
                path: target,
                ..batch.clone()
            });
        }
        self.storage.delete_prefix(&self.attempt_dir(attempt)).await?;
        Ok(promoted)
    }

    /// Move a task's committed batches to their final segment paths.
    pub async fn publish_task(
        &self,
        task: u32,
        batches: &[StagedBatch],
    ) -> Result<Vec<SegmentMeta>, StorageError> {
        let mut segments = Vec::with_capacity(batches.len());
        for batch in batches {
            let name = format!(
                "{SEGMENTS_DIR}/{}-{task:05}-{:06}.ndjson",
                self.job_id, batch.seq
            );
            self.storage.rename(&batch.path, &Path::from(name.as_str())).await?;
            segments.push(SegmentMeta {
                path: name,
                records: batch.records,
                bytes: batch.bytes,
            });
        }
        Ok(segments)
    }

    /// Remove the job's staging area and any of its segments.
    ///
    /// Only valid before the job's log entry exists; afterwards the segments
    /// are live.
    pub async fn discard_job(&self) -> Result<usize, StorageError> {
        let mut removed = self.storage.delete_prefix(&self.job_dir()).await?;

        let prefix = format!("{}-", self.job_id);
        for object in self.storage.list(&Path::from(SEGMENTS_DIR)).await? {
            if object
                .path
                .filename()
                .is_some_and(|name| name.starts_with(&prefix))
            {
                self.storage.delete(&object.path).await?;
                removed += 1;
            }
        }
        debug!(job = %self.job_id, removed, "Discarded job output");
        Ok(removed)
    }

    /// Remove the job's staging area after a successful commit.
    pub async fn cleanup(&self) -> Result<usize, StorageError> {
        self.storage.delete_prefix(&self.job_dir()).await
    }
}
