//! `git` subprocess implementation of [`Vcs`].

use crate::config::PROJECT_DIR;
use crate::git::error::{GitError, GitResult};
use crate::git::{MergeStatus, Vcs};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Runs `git` in a repository root.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    remote: String,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run_in(&self, dir: &Path, args: &[&str]) -> GitResult<Output> {
        debug!(args = %args.join(" "), dir = %dir.display(), "git");
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                args: args.join(" "),
                source,
            })
    }

    async fn checked_in(&self, dir: &Path, args: &[&str]) -> GitResult<String> {
        let output = self.run_in(dir, args).await?;
        if !output.status.success() {
            return Err(failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn checked(&self, args: &[&str]) -> GitResult<String> {
        self.checked_in(&self.root, args).await
    }
}

fn failure(args: &[&str], output: &Output) -> GitError {
    GitError::CommandFailed {
        args: args.join(" "),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Changed paths from `git status --porcelain`, excluding the project
/// directory, which holds runtime state rather than source.
fn changed_paths(status: &str) -> Vec<String> {
    let ignored = format!("{PROJECT_DIR}/");
    status
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = line[3..].trim();
            path.split_once(" -> ")
                .map_or(path, |(_, new)| new)
                .trim_matches('"')
                .to_string()
        })
        .filter(|path| !path.starts_with(&ignored))
        .collect()
}

/// Paths listed by `git worktree list --porcelain`.
fn parse_worktree_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect()
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl Vcs for GitCli {
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    async fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> GitResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| GitError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let path_arg = path.to_string_lossy();
        if self.branch_exists(branch).await? {
            debug!("Reusing existing branch");
            self.checked(&["worktree", "add", &path_arg, branch]).await?;
        } else {
            self.checked(&["worktree", "add", "-b", branch, &path_arg, base])
                .await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn remove_worktree(&self, path: &Path) -> GitResult<()> {
        let path_arg = path.to_string_lossy();
        self.checked(&["worktree", "remove", "--force", &path_arg])
            .await?;
        if let Err(e) = self.checked(&["worktree", "prune"]).await {
            warn!(error = %e, "git worktree prune failed");
        }
        Ok(())
    }

    async fn worktree_exists(&self, path: &Path) -> GitResult<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let listing = self.checked(&["worktree", "list", "--porcelain"]).await?;
        let wanted = normalize(path);
        Ok(parse_worktree_list(&listing)
            .iter()
            .any(|p| normalize(p) == wanted))
    }

    async fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = self
            .run_in(&self.root, &["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.status.success())
    }

    async fn current_branch(&self) -> GitResult<String> {
        let name = self
            .checked(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string();
        if name == "HEAD" {
            return Err(GitError::DetachedHead(self.root.clone()));
        }
        Ok(name)
    }

    async fn has_uncommitted_changes(&self, dir: &Path) -> GitResult<bool> {
        let status = self
            .checked_in(dir, &["status", "--porcelain=v1", "-uall"])
            .await?;
        Ok(!changed_paths(&status).is_empty())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    async fn commit_all(&self, dir: &Path, message: &str) -> GitResult<bool> {
        self.checked_in(dir, &["add", "-A"]).await?;
        let staged = self
            .checked_in(dir, &["diff", "--cached", "--name-only"])
            .await?;
        if staged.trim().is_empty() {
            debug!("Nothing staged, skipping commit");
            return Ok(false);
        }
        self.checked_in(dir, &["commit", "-m", message]).await?;
        Ok(true)
    }

    async fn recent_commits(&self, limit: usize) -> GitResult<Vec<String>> {
        let count = format!("-n{limit}");
        let output = self.run_in(&self.root, &["log", &count, "--format=%s"]).await?;
        // An unborn branch has no log.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(non_empty_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    #[instrument(skip_all, fields(branch))]
    async fn merge(&self, branch: &str, message: &str) -> GitResult<MergeStatus> {
        let args = ["merge", "--no-ff", "-m", message, branch];
        let output = self.run_in(&self.root, &args).await?;
        if output.status.success() {
            return Ok(MergeStatus::Clean);
        }
        let files = self.conflicted_files().await?;
        if files.is_empty() {
            return Err(failure(&args, &output));
        }
        debug!(count = files.len(), "Merge stopped on conflicts");
        Ok(MergeStatus::Conflicted(files))
    }

    async fn conflicted_files(&self) -> GitResult<Vec<String>> {
        let listing = self
            .checked(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(non_empty_lines(&listing))
    }

    async fn stage(&self, file: &str) -> GitResult<()> {
        self.checked(&["add", "--", file]).await?;
        Ok(())
    }

    async fn continue_merge(&self, message: &str) -> GitResult<()> {
        self.checked(&["commit", "--no-verify", "-m", message]).await?;
        Ok(())
    }

    async fn abort_merge(&self) -> GitResult<()> {
        self.checked(&["merge", "--abort"]).await?;
        Ok(())
    }

    async fn file_history(&self, file: &str, limit: usize) -> GitResult<String> {
        let count = format!("-n{limit}");
        self.checked(&["log", &count, "--format=%h %an %s", "--all", "--", file])
            .await
    }

    #[instrument(skip_all, fields(branch))]
    async fn push(&self, branch: &str) -> GitResult<()> {
        self.checked(&["push", &self.remote, branch]).await?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> GitResult<()> {
        self.checked(&["branch", "-D", branch]).await?;
        Ok(())
    }
}
