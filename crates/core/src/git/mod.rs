//! Version control collaborator.
//!
//! The engine talks to git only through the [`Vcs`] trait so merge and
//! worktree logic can be exercised against an in-memory double.

pub mod cli;
pub mod error;

use async_trait::async_trait;
use std::path::Path;

pub use cli::GitCli;
pub use error::{GitError, GitResult};

/// Result of merging a branch into the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// The merge completed and was committed.
    Clean,
    /// The merge stopped with conflicts in these files, relative to the repository root.
    Conflicted(Vec<String>),
}

/// Branch name of a task's isolated working copy.
pub fn task_branch(task_id: u64) -> String {
    format!("taskforge/task-{task_id}")
}

/// Directory name of a task's isolated working copy under the worktree dir.
pub fn worktree_dir_name(task_id: u64) -> String {
    format!("task-{task_id}")
}

/// Git operations used by the task engine.
///
/// Methods without a `dir` argument run in the main repository.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Check out `branch` at `path`, creating the branch from `base` when it
    /// does not exist yet.
    async fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> GitResult<()>;

    async fn remove_worktree(&self, path: &Path) -> GitResult<()>;

    async fn worktree_exists(&self, path: &Path) -> GitResult<bool>;

    async fn branch_exists(&self, branch: &str) -> GitResult<bool>;

    async fn current_branch(&self) -> GitResult<String>;

    /// Tracked or untracked changes in `dir`.
    async fn has_uncommitted_changes(&self, dir: &Path) -> GitResult<bool>;

    /// Stage everything in `dir` and commit. Returns false when there was
    /// nothing to commit.
    async fn commit_all(&self, dir: &Path, message: &str) -> GitResult<bool>;

    /// Subjects of the latest commits on the current branch, newest first.
    async fn recent_commits(&self, limit: usize) -> GitResult<Vec<String>>;

    async fn merge(&self, branch: &str, message: &str) -> GitResult<MergeStatus>;

    async fn conflicted_files(&self) -> GitResult<Vec<String>>;

    async fn stage(&self, file: &str) -> GitResult<()>;

    /// Commit an in-progress merge whose conflicts have been staged.
    async fn continue_merge(&self, message: &str) -> GitResult<()>;

    async fn abort_merge(&self) -> GitResult<()>;

    /// One line per commit that touched `file`.
    async fn file_history(&self, file: &str, limit: usize) -> GitResult<String>;

    async fn push(&self, branch: &str) -> GitResult<()>;

    async fn delete_branch(&self, branch: &str) -> GitResult<()>;
}
