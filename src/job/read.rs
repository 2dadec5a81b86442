//! Parallel read job.

use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JobConfig;
use crate::error::{CancelledSnafu, JobError, ReadError, TaskJoinSnafu};
use crate::record::Record;
use crate::source::{InputConnector, InputSplit};
use crate::storage::StoreConnector;

use super::DEFAULT_MAX_CONCURRENT_TASKS;

/// Reads every visible record of a resource, one task per split.
#[derive(Debug, Clone)]
pub struct ReadJob {
    config: JobConfig,
    connector: Arc<dyn StoreConnector>,
    max_concurrent_tasks: usize,
}

impl ReadJob {
    pub fn new(config: JobConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            connector,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }

    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    /// Read all splits. Records keep split order, and order within a split.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Vec<Record>, JobError> {
        let max_attempts = self.config.max_task_attempts()?;
        let input = InputConnector::new(Arc::clone(&self.connector));
        let splits = input.splits(&self.config).await?;
        info!(resource = self.config.resource(), splits = splits.len(), "Planned read");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut handles: JoinSet<Result<(usize, Vec<Record>), JobError>> = JoinSet::new();
        for split in splits.iter().cloned() {
            let input = input.clone();
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);
            let shutdown = shutdown.clone();
            handles.spawn(async move {
                run_split(input, config, split, semaphore, max_attempts, shutdown).await
            });
        }

        let mut results: Vec<Vec<Record>> = vec![Vec::new(); splits.len()];
        while let Some(joined) = handles.join_next().await {
            match joined.context(TaskJoinSnafu)? {
                Ok((index, records)) => results[index] = records,
                Err(e) => {
                    handles.abort_all();
                    return Err(e);
                }
            }
        }

        let records: Vec<Record> = results.into_iter().flatten().collect();
        info!(records = records.len(), "Read complete");
        Ok(records)
    }
}

async fn run_split(
    input: InputConnector,
    config: JobConfig,
    split: InputSplit,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    shutdown: CancellationToken,
) -> Result<(usize, Vec<Record>), JobError> {
    let _permit = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return CancelledSnafu.fail(),
        permit = semaphore.acquire_owned() => permit.ok().context(CancelledSnafu)?,
    };
    let records = read_with_retry(&input, &config, &split, max_attempts, &shutdown).await?;
    Ok((split.index, records))
}

async fn read_with_retry(
    input: &InputConnector,
    config: &JobConfig,
    split: &InputSplit,
    max_attempts: u32,
    shutdown: &CancellationToken,
) -> Result<Vec<Record>, JobError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match read_split(input, config, split, shutdown).await {
            Ok(Some(records)) => return Ok(records),
            Ok(None) => return CancelledSnafu.fail(),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!(split = split.index, attempt, error = %e, "Read failed, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Drain one split. `None` if cancelled part way.
async fn read_split(
    input: &InputConnector,
    config: &JobConfig,
    split: &InputSplit,
    shutdown: &CancellationToken,
) -> Result<Option<Vec<Record>>, ReadError> {
    let mut reader = input.open(config, split).await?;
    let mut records = Vec::with_capacity(split.segment.records);
    loop {
        match shutdown.run_until_cancelled(reader.next_record()).await {
            None => return Ok(None),
            Some(Ok(Some(record))) => records.push(record),
            Some(Ok(None)) => break,
            Some(Err(e)) => return Err(e),
        }
    }
    debug!(split = split.index, path = reader.path(), records = records.len(), "Split read");
    Ok(Some(records))
}
