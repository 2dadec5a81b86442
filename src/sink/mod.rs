//! Output connector.
//!
//! Each task attempt gets a [`RecordWriter`] over its own store connection.
//! Batches land in the job's staging area and become visible only through
//! the [`CommitCoordinator`].

mod staging;
pub mod traits;
mod writer;

pub use staging::StagingSink;
pub use traits::BatchSink;
pub use writer::{BatchLimits, RecordWriter, WriterStats};

use snafu::prelude::*;
use std::sync::Arc;

use crate::commit::{CommitCoordinator, StagingArea, TaskAttemptId};
use crate::config::JobConfig;
use crate::error::{SettingsSnafu, TargetSnafu, WriteError, WriterSetupSnafu};
use crate::resource::ResourcePath;
use crate::storage::StoreConnector;

/// Opens record writers for task attempts.
#[derive(Debug, Clone)]
pub struct OutputConnector {
    connector: Arc<dyn StoreConnector>,
}

impl OutputConnector {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    /// Open a writer for `attempt` and register it `Pending` with `coordinator`.
    pub async fn open(
        &self,
        config: &JobConfig,
        attempt: TaskAttemptId,
        coordinator: Arc<CommitCoordinator>,
    ) -> Result<RecordWriter, WriteError> {
        let resource = ResourcePath::parse(config.resource()).context(TargetSnafu)?;
        let limits = BatchLimits::from_config(config).context(SettingsSnafu)?;
        let storage = self
            .connector
            .connect(config.endpoint())
            .context(WriterSetupSnafu)?
            .scoped(&resource.prefix());

        let sink = StagingSink::new(StagingArea::new(storage, coordinator.job_id()), attempt);
        RecordWriter::start(attempt, coordinator, Box::new(sink), limits).await
    }
}
