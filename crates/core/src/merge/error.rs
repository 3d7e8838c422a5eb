//! Error types for merging and pushing task branches.

use crate::git::GitError;
use crate::state::StoreError;
use std::path::PathBuf;
use tf_protocol::task_models::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    /// Only completed tasks can be merged.
    #[error("Task {task_id} is {status}; only COMPLETED tasks can be merged")]
    NotMergeable { task_id: u64, status: TaskStatus },

    /// Only merged tasks can be pushed.
    #[error("Task {task_id} is {status}; only MERGED tasks can be pushed")]
    NotPushable { task_id: u64, status: TaskStatus },

    /// The branch being merged into has uncommitted changes.
    #[error("Branch '{branch}' has uncommitted changes; commit or stash them first")]
    DirtyTarget { branch: String },

    /// The task's isolated working copy is gone.
    #[error("Worktree for task {task_id} not found at {path}")]
    MissingWorktree { task_id: u64, path: PathBuf },

    /// A conflicted file could not be resolved; the merge was aborted.
    #[error("Could not resolve conflict in {file}: {reason}")]
    ResolutionFailed { file: String, reason: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type MergeResult<T> = Result<T, MergeError>;
