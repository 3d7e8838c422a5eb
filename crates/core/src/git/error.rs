//! Error types for git operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitError {
    /// The `git` executable could not be started.
    #[error("Failed to run git {args}: {source}")]
    Spawn {
        args: String,
        source: std::io::Error,
    },

    /// git exited non-zero.
    #[error("git {args} failed ({status}): {stderr}")]
    CommandFailed {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("HEAD is detached in {0}")]
    DetachedHead(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type GitResult<T> = Result<T, GitError>;
