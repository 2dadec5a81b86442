//! Parallel write job.

use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commit::{CommitCoordinator, JobOutcome, TaskAttemptId, TaskCommitState, WriteMode};
use crate::config::JobConfig;
use crate::error::{CancelledSnafu, InvalidOptionSnafu, JobError, TaskFailedSnafu, WriteError};
use crate::record::Record;
use crate::sink::OutputConnector;
use crate::storage::StoreConnector;

use super::DEFAULT_MAX_CONCURRENT_TASKS;

/// Summary of a finished write job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub outcome: JobOutcome,
    /// Records written by committed tasks.
    pub records: usize,
    /// Attempts started across all tasks.
    pub attempts: u32,
}

/// Result of one task: how many attempts it took and what it wrote.
#[derive(Debug, Clone, Copy)]
struct TaskSummary {
    attempts: u32,
    records: usize,
}

/// Writes partitions of records as one job, one task per partition.
#[derive(Debug, Clone)]
pub struct WriteJob {
    config: JobConfig,
    connector: Arc<dyn StoreConnector>,
    mode: WriteMode,
    max_concurrent_tasks: usize,
}

impl WriteJob {
    pub fn new(config: JobConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            connector,
            mode: WriteMode::Append,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    /// Run the job to a visibility decision.
    ///
    /// A task whose attempts all abort leaves the job `NotVisible`; that is
    /// reported in the returned [`JobReport`], not as an error. Cancellation
    /// aborts the job and returns [`JobError::Cancelled`].
    pub async fn run(
        &self,
        partitions: Vec<Vec<Record>>,
        shutdown: CancellationToken,
    ) -> Result<JobReport, JobError> {
        let max_attempts = self.config.max_task_attempts()?;
        let expected_tasks = u32::try_from(partitions.len()).ok().context(InvalidOptionSnafu {
            message: "too many partitions",
        })?;

        let coordinator = Arc::new(CommitCoordinator::new(
            &self.config,
            self.connector.as_ref(),
            self.mode,
        )?);
        let output = OutputConnector::new(Arc::clone(&self.connector));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));

        let mut handles: JoinSet<(u32, Result<TaskSummary, JobError>)> = JoinSet::new();
        for (task, records) in (0..expected_tasks).zip(partitions) {
            let ctx = TaskContext {
                config: self.config.clone(),
                output: output.clone(),
                coordinator: Arc::clone(&coordinator),
                semaphore: Arc::clone(&semaphore),
                shutdown: shutdown.clone(),
                max_attempts,
            };
            handles.spawn(async move { (task, ctx.run(task, records).await) });
        }
        info!(job = coordinator.job_id(), tasks = expected_tasks, "Spawned write tasks");

        let mut records = 0;
        let mut attempts = 0;
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((task, Ok(summary))) => {
                    records += summary.records;
                    attempts += summary.attempts;
                    info!(task, attempts = summary.attempts, "Task completed");
                }
                Ok((task, Err(e))) => {
                    if let JobError::TaskFailed { attempts: n, .. } = &e {
                        attempts += n;
                    }
                    error!(task, error = %e, "Task failed");
                }
                Err(e) => {
                    error!(error = %e, "Write task panicked");
                }
            }
        }

        if shutdown.is_cancelled() {
            warn!(job = coordinator.job_id(), "Shutdown requested, aborting job");
            coordinator.abort_job().await?;
            return CancelledSnafu.fail();
        }

        let outcome = coordinator.commit_job(expected_tasks).await?;
        if !outcome.is_visible() {
            records = 0;
        }
        Ok(JobReport {
            job_id: coordinator.job_id().to_string(),
            outcome,
            records,
            attempts,
        })
    }
}

/// Everything one task needs, cloned per task.
struct TaskContext {
    config: JobConfig,
    output: OutputConnector,
    coordinator: Arc<CommitCoordinator>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    max_attempts: u32,
}

impl TaskContext {
    async fn run(self, task: u32, records: Vec<Record>) -> Result<TaskSummary, JobError> {
        let _permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return CancelledSnafu.fail(),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.ok().context(CancelledSnafu)?
            }
        };

        let mut attempt = TaskAttemptId::new(task, 0);
        while attempt.attempt < self.max_attempts {
            let result = self.run_attempt(attempt, &records).await;
            if self.shutdown.is_cancelled() {
                return CancelledSnafu.fail();
            }
            match result {
                Ok(TaskCommitState::Committed) => {
                    return Ok(TaskSummary {
                        attempts: attempt.attempt + 1,
                        records: records.len(),
                    });
                }
                Ok(state) => {
                    warn!(%attempt, %state, "Task attempt did not commit, retrying");
                }
                Err(e) if e.is_retryable() => {
                    warn!(%attempt, error = %e, "Task attempt failed, retrying");
                }
                Err(e) => {
                    error!(%attempt, error = %e, "Task attempt failed permanently");
                    return TaskFailedSnafu {
                        task,
                        attempts: attempt.attempt + 1,
                    }
                    .fail();
                }
            }
            attempt = attempt.retry();
        }

        TaskFailedSnafu {
            task,
            attempts: self.max_attempts,
        }
        .fail()
    }

    /// One attempt: write every record, then close. Cancellation aborts.
    async fn run_attempt(
        &self,
        attempt: TaskAttemptId,
        records: &[Record],
    ) -> Result<TaskCommitState, WriteError> {
        let mut writer = self
            .output
            .open(&self.config, attempt, Arc::clone(&self.coordinator))
            .await?;

        for record in records {
            if self.shutdown.is_cancelled() {
                return Ok(writer.abort().await);
            }
            if let Err(e) = writer.write(record).await {
                writer.abort().await;
                return Err(e);
            }
        }
        if self.shutdown.is_cancelled() {
            return Ok(writer.abort().await);
        }
        Ok(writer.close().await)
    }
}
