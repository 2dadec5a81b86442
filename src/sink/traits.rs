//! Traits for batch persistence.
//!
//! The record writer only decides *when* a batch is complete; a `BatchSink`
//! decides *where* it goes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::commit::StagedBatch;
use crate::error::StorageError;

/// Persists encoded batches for one task attempt.
#[async_trait]
pub trait BatchSink: Send {
    /// Persist batch `seq` holding `records` NDJSON lines.
    ///
    /// Either the whole batch is stored or an error is returned; a failed
    /// batch is never partially visible to the coordinator.
    async fn write_batch(
        &mut self,
        seq: usize,
        records: usize,
        payload: Bytes,
    ) -> Result<StagedBatch, StorageError>;
}
