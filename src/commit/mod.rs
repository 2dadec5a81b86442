//! Two-phase commit of job output.
//!
//! Each task attempt stages its batches privately. `commit_task` promotes
//! one attempt per task; `commit_job` publishes every task's batches as
//! segments and appends a single commit log entry. Until that entry exists
//! no reader can see any of the job's data, and `abort_job` removes it all.

pub mod log;
pub mod staging;
pub mod state;

pub use log::{CommitLog, LogEntry, SegmentMeta, Snapshot, WriteMode};
pub use staging::{StagedBatch, StagingArea};
pub use state::{TaskAttemptId, TaskCommitState};

use chrono::Utc;
use snafu::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{JobConfig, STAGING_COMMITTER};
use crate::emit;
use crate::error::{
    AlreadyCommittedSnafu, CommitError, InvalidTransitionSnafu, JobError, JobFinalizedSnafu,
    StagingSnafu, StorageSnafu, TargetSnafu, UnknownAttemptSnafu, UnsupportedCommitterSnafu,
    WriteSnafu,
};
use crate::metrics::events::{JobFinished, JobStatus, TaskAttemptFinished};
use crate::resource::ResourcePath;
use crate::storage::StoreConnector;

/// Final visibility decision for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output is readable as of log `version`.
    Visible { version: u64 },
    /// Nothing the job wrote is readable.
    NotVisible { failed_tasks: Vec<u32> },
}

impl JobOutcome {
    pub fn is_visible(&self) -> bool {
        matches!(self, JobOutcome::Visible { .. })
    }
}

/// The single committed attempt of a task and the batches it promoted.
struct CommittedTask {
    attempt: TaskAttemptId,
    batches: Vec<StagedBatch>,
}

struct CoordinatorState {
    attempts: HashMap<TaskAttemptId, TaskCommitState>,
    committed: BTreeMap<u32, CommittedTask>,
    /// Tasks whose winning attempt is being promoted outside the lock.
    promoting: HashMap<u32, TaskAttemptId>,
    outcome: Option<JobOutcome>,
}

/// Tracks every task attempt of one write job and decides its visibility.
///
/// Shared by all tasks of the job behind an `Arc`; attempts report into it
/// and the job driver finalizes it exactly once.
pub struct CommitCoordinator {
    job_id: String,
    mode: WriteMode,
    staging: StagingArea,
    log: CommitLog,
    state: Mutex<CoordinatorState>,
    started: Instant,
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("job_id", &self.job_id)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl CommitCoordinator {
    /// Start a new job against the configured resource.
    ///
    /// Opens the coordinator's own store connection; tasks use their own.
    pub fn new(
        config: &JobConfig,
        connector: &dyn StoreConnector,
        mode: WriteMode,
    ) -> Result<Self, JobError> {
        let committer = config.committer();
        ensure!(
            committer == STAGING_COMMITTER,
            UnsupportedCommitterSnafu { name: committer }
        );

        let resource = ResourcePath::parse(config.resource())
            .context(TargetSnafu)
            .context(WriteSnafu)?;
        let storage = connector
            .connect(config.endpoint())
            .context(StorageSnafu)?
            .scoped(&resource.prefix());

        let job_id = Uuid::now_v7().to_string();
        info!(job = %job_id, resource = %resource, ?mode, "Started write job");

        Ok(Self {
            staging: StagingArea::new(storage.clone(), job_id.clone()),
            log: CommitLog::new(storage),
            job_id,
            mode,
            state: Mutex::new(CoordinatorState {
                attempts: HashMap::new(),
                committed: BTreeMap::new(),
                promoting: HashMap::new(),
                outcome: None,
            }),
            started: Instant::now(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Register a new attempt as `Pending`.
    pub async fn setup_task(&self, attempt: TaskAttemptId) -> Result<(), CommitError> {
        let mut state = self.state.lock().await;
        ensure!(
            state.outcome.is_none(),
            JobFinalizedSnafu {
                job_id: &self.job_id
            }
        );
        if let Some(current) = state.attempts.get(&attempt) {
            current.transition(attempt, TaskCommitState::Pending)?;
        }
        state.attempts.insert(attempt, TaskCommitState::Pending);
        debug!(job = %self.job_id, %attempt, "Registered task attempt");
        Ok(())
    }

    /// Commit `attempt` with the batches it staged.
    ///
    /// If another attempt of the task already committed, or is committing,
    /// this attempt is aborted and its output discarded. On any failure the
    /// attempt ends `Aborted`. The task is reserved under the lock and the
    /// batches are promoted without it, so tasks commit concurrently.
    pub async fn commit_task(
        &self,
        attempt: TaskAttemptId,
        staged: Vec<StagedBatch>,
    ) -> Result<(), CommitError> {
        let mut state = self.state.lock().await;
        ensure!(
            state.outcome.is_none(),
            JobFinalizedSnafu {
                job_id: &self.job_id
            }
        );
        let current = *state.attempts.get(&attempt).context(UnknownAttemptSnafu {
            attempt: attempt.to_string(),
        })?;
        current.transition(attempt, TaskCommitState::Committed)?;

        let winner = state
            .committed
            .get(&attempt.task)
            .map(|c| c.attempt)
            .or_else(|| state.promoting.get(&attempt.task).copied());
        if let Some(winner) = winner {
            warn!(
                job = %self.job_id,
                %attempt,
                %winner,
                "Task already committed, discarding attempt"
            );
            self.finish_attempt(&mut state, attempt, TaskCommitState::Aborted);
            drop(state);
            self.discard_quietly(attempt).await;
            return AlreadyCommittedSnafu { task: attempt.task }.fail();
        }
        state.promoting.insert(attempt.task, attempt);
        drop(state);

        let promoted = self.staging.promote_attempt(attempt, &staged).await;

        let mut state = self.state.lock().await;
        state.promoting.remove(&attempt.task);
        let still_pending = state.attempts.get(&attempt) == Some(&TaskCommitState::Pending);
        match promoted {
            Ok(batches) if state.outcome.is_none() && still_pending => {
                let records: usize = batches.iter().map(|b| b.records).sum();
                self.finish_attempt(&mut state, attempt, TaskCommitState::Committed);
                state
                    .committed
                    .insert(attempt.task, CommittedTask { attempt, batches });
                info!(job = %self.job_id, %attempt, records, "Task committed");
                Ok(())
            }
            // The job or the attempt was aborted while the batches were moving.
            Ok(_) => {
                let err = match state.outcome {
                    Some(_) => JobFinalizedSnafu {
                        job_id: &self.job_id,
                    }
                    .build(),
                    None => InvalidTransitionSnafu {
                        attempt: attempt.to_string(),
                        from: TaskCommitState::Aborted,
                        to: TaskCommitState::Committed,
                    }
                    .build(),
                };
                drop(state);
                if let Err(e) = self.staging.discard_committed(attempt.task).await {
                    warn!(job = %self.job_id, %attempt, error = %e, "Failed to discard late commit");
                }
                Err(err)
            }
            Err(source) => {
                self.finish_attempt(&mut state, attempt, TaskCommitState::Aborted);
                drop(state);
                self.discard_quietly(attempt).await;
                Err(CommitError::Staging { source })
            }
        }
    }

    /// Abort `attempt` and delete what it staged.
    pub async fn abort_task(&self, attempt: TaskAttemptId) -> Result<(), CommitError> {
        let mut state = self.state.lock().await;
        let current = *state.attempts.get(&attempt).context(UnknownAttemptSnafu {
            attempt: attempt.to_string(),
        })?;
        current.transition(attempt, TaskCommitState::Aborted)?;
        self.finish_attempt(&mut state, attempt, TaskCommitState::Aborted);
        drop(state);

        self.staging
            .discard_attempt(attempt)
            .await
            .context(StagingSnafu)?;
        info!(job = %self.job_id, %attempt, "Task attempt aborted");
        Ok(())
    }

    /// Decide the job's visibility.
    ///
    /// The job becomes visible only when each of the `expected_tasks` tasks
    /// (numbered `0..expected_tasks`) has a committed attempt. Otherwise, or if
    /// publishing fails, the job is aborted.
    pub async fn commit_job(&self, expected_tasks: u32) -> Result<JobOutcome, CommitError> {
        let mut state = self.state.lock().await;
        ensure!(
            state.outcome.is_none(),
            JobFinalizedSnafu {
                job_id: &self.job_id
            }
        );

        let failed_tasks: Vec<u32> = (0..expected_tasks)
            .filter(|task| !state.committed.contains_key(task))
            .collect();
        if !failed_tasks.is_empty() {
            warn!(job = %self.job_id, ?failed_tasks, "Tasks did not commit, aborting job");
            let outcome = JobOutcome::NotVisible { failed_tasks };
            self.abort_locked(&mut state, outcome.clone()).await?;
            return Ok(outcome);
        }

        match self.publish(&state).await {
            Ok(version) => {
                if let Err(e) = self.staging.cleanup().await {
                    warn!(job = %self.job_id, error = %e, "Failed to clean staging area");
                }
                if self.mode == WriteMode::Overwrite {
                    if let Err(e) = self.log.prune_superseded(version).await {
                        warn!(job = %self.job_id, version, error = %e, "Failed to prune superseded segments");
                    }
                }
                let outcome = JobOutcome::Visible { version };
                state.outcome = Some(outcome.clone());
                emit!(JobFinished {
                    status: JobStatus::Visible,
                    duration: self.started.elapsed(),
                });
                info!(job = %self.job_id, version, tasks = expected_tasks, "Job committed");
                Ok(outcome)
            }
            Err(e) => {
                warn!(job = %self.job_id, error = %e, "Job commit failed, aborting");
                let outcome = JobOutcome::NotVisible {
                    failed_tasks: Vec::new(),
                };
                if let Err(abort_err) = self.abort_locked(&mut state, outcome).await {
                    warn!(job = %self.job_id, error = %abort_err, "Cleanup after failed commit failed");
                }
                Err(e)
            }
        }
    }

    /// Abort the whole job. Nothing it wrote becomes visible.
    pub async fn abort_job(&self) -> Result<JobOutcome, CommitError> {
        let mut state = self.state.lock().await;
        ensure!(
            state.outcome.is_none(),
            JobFinalizedSnafu {
                job_id: &self.job_id
            }
        );
        let tasks: BTreeSet<u32> = state.attempts.keys().map(|a| a.task).collect();
        let failed_tasks = tasks
            .into_iter()
            .filter(|task| !state.committed.contains_key(task))
            .collect();
        let outcome = JobOutcome::NotVisible { failed_tasks };
        self.abort_locked(&mut state, outcome.clone()).await?;
        Ok(outcome)
    }

    /// Current state of `attempt`, if registered.
    pub async fn state(&self, attempt: TaskAttemptId) -> Option<TaskCommitState> {
        self.state.lock().await.attempts.get(&attempt).copied()
    }

    /// The job's outcome once finalized.
    pub async fn outcome(&self) -> Option<JobOutcome> {
        self.state.lock().await.outcome.clone()
    }

    async fn publish(&self, state: &CoordinatorState) -> Result<u64, CommitError> {
        let mut segments = Vec::new();
        for (task, committed) in &state.committed {
            let published = self
                .staging
                .publish_task(*task, &committed.batches)
                .await
                .context(StagingSnafu)?;
            segments.extend(published);
        }

        let entry = LogEntry {
            job_id: self.job_id.clone(),
            mode: self.mode,
            segments,
            committed_at: Utc::now(),
        };
        self.log.append(&entry).await
    }

    async fn abort_locked(
        &self,
        state: &mut CoordinatorState,
        outcome: JobOutcome,
    ) -> Result<(), CommitError> {
        let pending: Vec<TaskAttemptId> = state
            .attempts
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(a, _)| *a)
            .collect();
        for attempt in pending {
            self.finish_attempt(state, attempt, TaskCommitState::Aborted);
        }
        state.outcome = Some(outcome);
        emit!(JobFinished {
            status: JobStatus::NotVisible,
            duration: self.started.elapsed(),
        });

        let removed = self.staging.discard_job().await.context(StagingSnafu)?;
        info!(job = %self.job_id, removed, "Job aborted");
        Ok(())
    }

    fn finish_attempt(
        &self,
        state: &mut CoordinatorState,
        attempt: TaskAttemptId,
        to: TaskCommitState,
    ) {
        state.attempts.insert(attempt, to);
        emit!(TaskAttemptFinished { state: to });
    }

    async fn discard_quietly(&self, attempt: TaskAttemptId) {
        if let Err(e) = self.staging.discard_attempt(attempt).await {
            warn!(job = %self.job_id, %attempt, error = %e, "Failed to discard attempt output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, TableProperties, keys};
    use crate::storage::MemoryConnector;
    use bytes::Bytes;
    use futures::StreamExt;
    use object_store::ObjectStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn job_config() -> JobConfig {
        let table = TableProperties::new().with(keys::LOCATION, "logs/event");
        let ambient = Settings::new().with(keys::HOST, "es0");
        JobConfig::build_with_defaults(&table, &ambient).unwrap()
    }

    async fn stage(
        connector: &dyn StoreConnector,
        coordinator: &CommitCoordinator,
        attempt: TaskAttemptId,
        batches: usize,
    ) -> Vec<StagedBatch> {
        let storage = connector
            .connect(job_config().endpoint())
            .unwrap()
            .scoped(&object_store::path::Path::from("logs/event"));
        let area = StagingArea::new(storage, coordinator.job_id());
        let mut staged = Vec::new();
        for seq in 0..batches {
            staged.push(
                area.write_batch(attempt, seq, 1, Bytes::from_static(b"{\"a\":1}\n"))
                    .await
                    .unwrap(),
            );
        }
        staged
    }

    async fn snapshot(connector: &MemoryConnector) -> Snapshot {
        let storage = connector
            .connect(job_config().endpoint())
            .unwrap()
            .scoped(&object_store::path::Path::from("logs/event"));
        CommitLog::new(storage).snapshot().await.unwrap()
    }

    async fn segment_files(connector: &MemoryConnector) -> usize {
        let prefix = object_store::path::Path::from("logs/event/segments");
        connector.store().list(Some(&prefix)).count().await
    }

    #[tokio::test]
    async fn test_all_tasks_commit_then_visible() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();

        for task in 0..2 {
            let attempt = TaskAttemptId::new(task, 0);
            coordinator.setup_task(attempt).await.unwrap();
            let staged = stage(&connector, &coordinator, attempt, 2).await;
            coordinator.commit_task(attempt, staged).await.unwrap();
            assert_eq!(
                coordinator.state(attempt).await,
                Some(TaskCommitState::Committed)
            );
        }

        let outcome = coordinator.commit_job(2).await.unwrap();
        assert_eq!(outcome, JobOutcome::Visible { version: 1 });
        assert_eq!(snapshot(&connector).await.segments.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_task_aborts_job() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();

        let ok = TaskAttemptId::new(0, 0);
        coordinator.setup_task(ok).await.unwrap();
        let staged = stage(&connector, &coordinator, ok, 1).await;
        coordinator.commit_task(ok, staged).await.unwrap();

        let failed = TaskAttemptId::new(1, 0);
        coordinator.setup_task(failed).await.unwrap();
        stage(&connector, &coordinator, failed, 1).await;
        coordinator.abort_task(failed).await.unwrap();

        let outcome = coordinator.commit_job(2).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::NotVisible {
                failed_tasks: vec![1]
            }
        );
        assert!(snapshot(&connector).await.segments.is_empty());
        assert_eq!(connector.store().list(None).count().await, 0);
        assert!(matches!(
            coordinator.commit_job(2).await,
            Err(CommitError::JobFinalized { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_commit_of_task_refused() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();

        let first = TaskAttemptId::new(0, 0);
        let second = first.retry();
        coordinator.setup_task(first).await.unwrap();
        coordinator.setup_task(second).await.unwrap();
        let staged_first = stage(&connector, &coordinator, first, 1).await;
        let staged_second = stage(&connector, &coordinator, second, 3).await;

        coordinator.commit_task(first, staged_first).await.unwrap();
        let err = coordinator
            .commit_task(second, staged_second)
            .await
            .unwrap_err();
        assert!(matches!(err, CommitError::AlreadyCommitted { task: 0 }));
        assert_eq!(
            coordinator.state(second).await,
            Some(TaskCommitState::Aborted)
        );

        coordinator.commit_job(1).await.unwrap();
        assert_eq!(snapshot(&connector).await.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_task_being_promoted_refuses_rival() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();

        let first = TaskAttemptId::new(0, 0);
        let rival = first.retry();
        coordinator.setup_task(first).await.unwrap();
        coordinator.setup_task(rival).await.unwrap();
        let staged = stage(&connector, &coordinator, rival, 1).await;

        // `first` holds the reservation, as it would mid-promotion.
        coordinator.state.lock().await.promoting.insert(0, first);

        let err = coordinator.commit_task(rival, staged).await.unwrap_err();
        assert!(matches!(err, CommitError::AlreadyCommitted { task: 0 }));
        assert_eq!(coordinator.state(rival).await, Some(TaskCommitState::Aborted));
        assert_eq!(coordinator.state(first).await, Some(TaskCommitState::Pending));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_commit_concurrently() {
        let dir = tempfile::TempDir::new().unwrap();
        let connector = crate::storage::LocalConnector::new(dir.path());
        let coordinator = Arc::new(
            CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap(),
        );

        let mut handles = tokio::task::JoinSet::new();
        for task in 0..8 {
            let attempt = TaskAttemptId::new(task, 0);
            coordinator.setup_task(attempt).await.unwrap();
            let staged = stage(&connector, &coordinator, attempt, 2).await;
            let coordinator = Arc::clone(&coordinator);
            handles.spawn(async move { coordinator.commit_task(attempt, staged).await });
        }

        // Queries answer while promotions are in flight.
        let first = TaskAttemptId::new(0, 0);
        let state = tokio::time::timeout(Duration::from_secs(5), coordinator.state(first))
            .await
            .unwrap();
        assert!(state.is_some());

        while let Some(result) = handles.join_next().await {
            result.unwrap().unwrap();
        }
        for task in 0..8 {
            assert_eq!(
                coordinator.state(TaskAttemptId::new(task, 0)).await,
                Some(TaskCommitState::Committed)
            );
        }

        assert!(coordinator.commit_job(8).await.unwrap().is_visible());
        let storage = connector
            .connect(job_config().endpoint())
            .unwrap()
            .scoped(&object_store::path::Path::from("logs/event"));
        assert_eq!(CommitLog::new(storage).snapshot().await.unwrap().segments.len(), 16);
    }

    #[tokio::test]
    async fn test_overwrite_prunes_replaced_segments() {
        let connector = MemoryConnector::new();

        let first = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();
        let attempt = TaskAttemptId::new(0, 0);
        first.setup_task(attempt).await.unwrap();
        let staged = stage(&connector, &first, attempt, 2).await;
        first.commit_task(attempt, staged).await.unwrap();
        first.commit_job(1).await.unwrap();
        assert_eq!(segment_files(&connector).await, 2);

        let second = CommitCoordinator::new(&job_config(), &connector, WriteMode::Overwrite).unwrap();
        second.setup_task(attempt).await.unwrap();
        let staged = stage(&connector, &second, attempt, 1).await;
        second.commit_task(attempt, staged).await.unwrap();
        assert_eq!(
            second.commit_job(1).await.unwrap(),
            JobOutcome::Visible { version: 2 }
        );

        assert_eq!(segment_files(&connector).await, 1);
        assert_eq!(snapshot(&connector).await.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();
        let attempt = TaskAttemptId::new(0, 0);

        assert!(matches!(
            coordinator.commit_task(attempt, Vec::new()).await,
            Err(CommitError::UnknownAttempt { .. })
        ));

        coordinator.setup_task(attempt).await.unwrap();
        coordinator.abort_task(attempt).await.unwrap();
        assert!(matches!(
            coordinator.commit_task(attempt, Vec::new()).await,
            Err(CommitError::InvalidTransition { .. })
        ));
        assert!(matches!(
            coordinator.abort_task(attempt).await,
            Err(CommitError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_job_marks_pending_attempts() {
        let connector = MemoryConnector::new();
        let coordinator = CommitCoordinator::new(&job_config(), &connector, WriteMode::Append).unwrap();
        let attempt = TaskAttemptId::new(3, 0);
        coordinator.setup_task(attempt).await.unwrap();
        stage(&connector, &coordinator, attempt, 2).await;

        let outcome = coordinator.abort_job().await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::NotVisible {
                failed_tasks: vec![3]
            }
        );
        assert_eq!(
            coordinator.state(attempt).await,
            Some(TaskCommitState::Aborted)
        );
        assert_eq!(coordinator.outcome().await, Some(outcome));
        assert_eq!(connector.store().list(None).count().await, 0);
    }

    #[test]
    fn test_unsupported_committer_rejected() {
        let table = TableProperties::new().with(keys::LOCATION, "logs");
        let ambient = Settings::new()
            .with(keys::HOST, "es0")
            .with(keys::OUTPUT_COMMITTER, "host.default");
        let config =
            JobConfig::build(&table, &ambient, crate::config::CommitterPolicy::RespectHost).unwrap();

        let err =
            CommitCoordinator::new(&config, &MemoryConnector::new(), WriteMode::Append).unwrap_err();
        assert!(matches!(
            err,
            JobError::Config {
                source: crate::error::ConfigError::UnsupportedCommitter { .. }
            }
        ));
    }
}
