//! Batch sink backed by the job's staging area.

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::BatchSink;
use crate::commit::{StagedBatch, StagingArea, TaskAttemptId};
use crate::error::StorageError;

/// Writes batches under the attempt's private staging directory.
#[derive(Debug)]
pub struct StagingSink {
    staging: StagingArea,
    attempt: TaskAttemptId,
}

impl StagingSink {
    pub fn new(staging: StagingArea, attempt: TaskAttemptId) -> Self {
        Self { staging, attempt }
    }
}

#[async_trait]
impl BatchSink for StagingSink {
    async fn write_batch(
        &mut self,
        seq: usize,
        records: usize,
        payload: Bytes,
    ) -> Result<StagedBatch, StorageError> {
        self.staging
            .write_batch(self.attempt, seq, records, payload)
            .await
    }
}
