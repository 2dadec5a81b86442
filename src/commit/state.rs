//! Per-attempt commit states.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;

use crate::error::{CommitError, InvalidTransitionSnafu};

/// Identifies one execution attempt of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskAttemptId {
    pub task: u32,
    pub attempt: u32,
}

impl TaskAttemptId {
    pub fn new(task: u32, attempt: u32) -> Self {
        Self { task, attempt }
    }

    /// The next attempt of the same task.
    pub fn retry(self) -> Self {
        Self {
            task: self.task,
            attempt: self.attempt + 1,
        }
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{:05}/attempt-{}", self.task, self.attempt)
    }
}

/// Lifecycle of one attempt. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCommitState {
    #[default]
    Pending,
    Committed,
    Aborted,
}

impl TaskCommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCommitState::Pending => "pending",
            TaskCommitState::Committed => "committed",
            TaskCommitState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskCommitState::Pending)
    }

    /// Move to `to`, which is only allowed out of `Pending`.
    pub fn transition(
        self,
        attempt: TaskAttemptId,
        to: TaskCommitState,
    ) -> Result<TaskCommitState, CommitError> {
        ensure!(
            self == TaskCommitState::Pending && to.is_terminal(),
            InvalidTransitionSnafu {
                attempt: attempt.to_string(),
                from: self,
                to,
            }
        );
        Ok(to)
    }
}

impl fmt::Display for TaskCommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
