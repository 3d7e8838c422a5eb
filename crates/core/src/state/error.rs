//! Error types for task and iteration persistence.

use std::path::PathBuf;
use tf_protocol::task_models::TaskStatus;
use thiserror::Error;

/// Errors raised while reading or writing persisted records.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read or write a record on disk.
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record exists but does not satisfy its schema.
    #[error("Invalid record at {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },

    /// No task with this id exists.
    #[error("Task {0} not found")]
    TaskNotFound(u64),

    /// No iteration with this number exists for the task.
    #[error("Iteration {iteration} of task {task_id} not found")]
    IterationNotFound { task_id: u64, iteration: u32 },

    /// Iteration numbers must grow by exactly one.
    #[error("Iteration {requested} of task {task_id} is out of sequence (next is {expected})")]
    IterationOutOfSequence {
        task_id: u64,
        requested: u32,
        expected: u32,
    },

    /// The id counter lock could not be acquired in time.
    #[error("Timed out waiting for lock {0}")]
    LockTimeout(PathBuf),

    /// A blocking store operation did not run to completion.
    #[error("Background store operation failed: {0}")]
    Background(String),

    /// The requested status change is not allowed by the lifecycle.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A rejected lifecycle transition. The record is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task {task_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub task_id: u64,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Type alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::Io { path, source }
}
