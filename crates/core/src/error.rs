//! Top-level error type of task operations.
//!
//! Every failure is classified into an [`ErrorKind`] so callers can decide
//! how to present it, and restartable failures carry the command that
//! recovers them.

use crate::config::ConfigError;
use crate::git::GitError;
use crate::merge::MergeError;
use crate::sandbox::SandboxError;
use crate::state::{StoreError, TransitionError};
use crate::workflow::validation::InputValidation;
use crate::workflow::WorkflowError;
use serde::Serialize;
use tf_protocol::task_models::TaskStatus;
use thiserror::Error;

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or an illegal request. Nothing was changed.
    Validation,
    /// The sandbox or working copy could not be prepared.
    Environment,
    /// A merge conflict could not be settled.
    Conflict,
    /// An agent, runtime or remote call failed.
    ExternalService,
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid inputs for workflow '{workflow}': {validation}")]
    InvalidInputs {
        workflow: String,
        validation: InputValidation,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The sandbox could not be created or started; the task was reset to NEW.
    #[error("Sandbox {op} failed for task {task_id}: {source}")]
    Sandbox {
        task_id: u64,
        op: &'static str,
        #[source]
        source: SandboxError,
    },

    /// A sandbox operation on an existing sandbox failed.
    #[error("Sandbox error for task {task_id}: {source}")]
    SandboxRuntime {
        task_id: u64,
        #[source]
        source: SandboxError,
    },

    #[error("Task {task_id} has no sandbox")]
    NoSandbox { task_id: u64 },

    #[error("Working copy for task {task_id} could not be prepared: {source}")]
    Worktree {
        task_id: u64,
        #[source]
        source: GitError,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

pub type TaskResult<T> = Result<T, TaskError>;

impl From<TransitionError> for TaskError {
    fn from(e: TransitionError) -> Self {
        TaskError::Store(StoreError::Transition(e))
    }
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Config(_)
            | TaskError::InvalidInputs { .. }
            | TaskError::Workflow(_)
            | TaskError::NoSandbox { .. } => ErrorKind::Validation,
            TaskError::Store(e) => store_kind(e),
            TaskError::Sandbox { .. } | TaskError::Worktree { .. } | TaskError::Io { .. } => {
                ErrorKind::Environment
            }
            TaskError::SandboxRuntime { .. } | TaskError::Git(_) => ErrorKind::ExternalService,
            TaskError::Merge(e) => match e {
                MergeError::NotMergeable { .. }
                | MergeError::NotPushable { .. }
                | MergeError::DirtyTarget { .. } => ErrorKind::Validation,
                MergeError::MissingWorktree { .. } | MergeError::Io { .. } => {
                    ErrorKind::Environment
                }
                MergeError::ResolutionFailed { .. } => ErrorKind::Conflict,
                MergeError::Git(_) => ErrorKind::ExternalService,
                MergeError::Store(e) => store_kind(e),
            },
        }
    }

    /// The command that recovers the task, when it is in a restartable state.
    pub fn remediation(&self) -> Option<String> {
        let restart = |task_id: u64| Some(format!("taskforge restart {task_id}"));
        match self {
            TaskError::Sandbox { task_id, .. } | TaskError::Worktree { task_id, .. } => {
                restart(*task_id)
            }
            TaskError::Store(StoreError::Transition(e))
            | TaskError::Merge(MergeError::Store(StoreError::Transition(e)))
                if e.from.is_restartable() =>
            {
                restart(e.task_id)
            }
            TaskError::Merge(MergeError::NotMergeable { task_id, status })
                if status.is_restartable() =>
            {
                restart(*task_id)
            }
            TaskError::Merge(MergeError::NotMergeable {
                task_id,
                status: TaskStatus::Merged,
            }) => Some(format!("taskforge push {task_id}")),
            TaskError::Merge(MergeError::DirtyTarget { .. }) => {
                Some("git stash".to_string())
            }
            _ => None,
        }
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::Io { .. } | StoreError::LockTimeout(_) | StoreError::Background(_) => {
            ErrorKind::Environment
        }
        _ => ErrorKind::Validation,
    }
}
