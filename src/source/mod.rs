//! Input connector.
//!
//! Splits are planned from the resource's commit log, one per visible
//! segment. Each split is read by its own [`RecordReader`] over its own
//! store connection.

mod reader;

pub use reader::RecordReader;

use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::commit::{CommitLog, SegmentMeta};
use crate::config::JobConfig;
use crate::error::{FatalQuerySnafu, ReadError, ReadSettingsSnafu, TransientIoSnafu};
use crate::resource::ResourcePath;
use crate::storage::{StorageProvider, StoreConnector};

/// A unit of read work: one committed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSplit {
    /// Position in the snapshot; results are reassembled in this order.
    pub index: usize,
    pub segment: SegmentMeta,
}

/// Plans splits and opens readers.
#[derive(Debug, Clone)]
pub struct InputConnector {
    connector: Arc<dyn StoreConnector>,
}

impl InputConnector {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    fn connect(
        &self,
        config: &JobConfig,
    ) -> Result<(ResourcePath, StorageProvider), ReadError> {
        let resource = ResourcePath::parse(config.query()).context(FatalQuerySnafu)?;
        let storage = self
            .connector
            .connect(config.endpoint())
            .context(TransientIoSnafu)?
            .scoped(&resource.prefix());
        Ok((resource, storage))
    }

    /// One split per visible segment, in commit order.
    pub async fn splits(&self, config: &JobConfig) -> Result<Vec<InputSplit>, ReadError> {
        let (resource, storage) = self.connect(config)?;
        let snapshot = CommitLog::new(storage).snapshot().await?;
        debug!(
            resource = %resource,
            version = snapshot.version,
            segments = snapshot.segments.len(),
            "Planned input splits"
        );
        Ok(snapshot
            .segments
            .into_iter()
            .enumerate()
            .map(|(index, segment)| InputSplit { index, segment })
            .collect())
    }

    /// Open a reader for `split`. The request is sent here; the body is
    /// fetched chunk by chunk as the reader is polled.
    pub async fn open(
        &self,
        config: &JobConfig,
        split: &InputSplit,
    ) -> Result<RecordReader, ReadError> {
        let scroll_size = config.scroll_size().context(ReadSettingsSnafu)?;
        let (resource, storage) = self.connect(config)?;
        let chunks = storage
            .get_stream(&Path::from(split.segment.path.as_str()))
            .await
            .context(TransientIoSnafu)?;
        Ok(RecordReader::new(
            storage,
            split.segment.path.clone(),
            chunks,
            resource.query().clone(),
            scroll_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, TableProperties, keys};
    use crate::storage::MemoryConnector;

    fn config(location: &str) -> JobConfig {
        let table = TableProperties::new().with(keys::LOCATION, location);
        JobConfig::build_with_defaults(&table, &Settings::new().with(keys::HOST, "es0")).unwrap()
    }

    #[tokio::test]
    async fn test_empty_resource_has_no_splits() {
        let input = InputConnector::new(Arc::new(MemoryConnector::new()));
        assert!(input.splits(&config("logs/event")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_query_is_fatal() {
        let input = InputConnector::new(Arc::new(MemoryConnector::new()));
        let err = input.splits(&config("logs?user=kimchy")).await.unwrap_err();
        assert!(matches!(err, ReadError::FatalQuery { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_segment_is_transient() {
        let input = InputConnector::new(Arc::new(MemoryConnector::new()));
        let split = InputSplit {
            index: 0,
            segment: SegmentMeta {
                path: "segments/gone.ndjson".into(),
                records: 1,
                bytes: 1,
            },
        };
        let err = input.open(&config("logs"), &split).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
