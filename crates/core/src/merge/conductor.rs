//! Merge state machine for a single task.
//!
//! `preconditions -> commit pending worktree changes -> merge ->
//! {clean | conflicts -> resolve each file -> operator gate -> finalize}`
//!
//! A failed precondition leaves everything untouched. Once a merge has
//! started, every error path aborts it so the repository is never left
//! mid-merge.

use crate::agents::assistant::{commit_message_or_fallback, has_conflict_markers, Assistant};
use crate::git::{MergeStatus, Vcs};
use crate::merge::error::{MergeError, MergeResult};
use crate::state::{IterationManager, TaskRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tf_protocol::config_models::MergeConfig;
use tf_protocol::task_models::{Task, TaskStatus};
use tracing::{debug, info, instrument, warn};

const HISTORY_DEPTH: usize = 10;
const RECENT_COMMITS: usize = 10;

/// Operator gate consulted before a conflict resolution is committed.
#[async_trait]
pub trait MergeConfirmer: Send + Sync {
    /// Called once every conflicted file has a staged resolution.
    async fn confirm(&self, task: &Task, resolved_files: &[String]) -> bool;
}

/// Confirmer with a fixed answer, for non-interactive use.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmer(pub bool);

#[async_trait]
impl MergeConfirmer for FixedConfirmer {
    async fn confirm(&self, _task: &Task, _resolved_files: &[String]) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The task branch is merged and the task is `MERGED`.
    Merged {
        /// Pending worktree changes were committed before merging.
        commit_created: bool,
        /// Files whose conflicts were resolved by the assistant.
        resolved_files: Vec<String>,
    },
    /// The operator rejected the conflict resolution. The merge was
    /// aborted and the task is unchanged.
    Declined { files: Vec<String> },
}

pub struct MergeConductor {
    vcs: Arc<dyn Vcs>,
    assistant: Arc<dyn Assistant>,
    repo_root: PathBuf,
    config: MergeConfig,
}

impl MergeConductor {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        assistant: Arc<dyn Assistant>,
        repo_root: impl Into<PathBuf>,
        config: MergeConfig,
    ) -> Self {
        Self {
            vcs,
            assistant,
            repo_root: repo_root.into(),
            config,
        }
    }

    /// Merge the task branch into the current branch.
    #[instrument(skip_all, fields(task_id = record.id()))]
    pub async fn merge(
        &self,
        record: &mut TaskRecord,
        iterations: &IterationManager,
        confirmer: &dyn MergeConfirmer,
    ) -> MergeResult<MergeOutcome> {
        let task = record.task().clone();
        self.check_preconditions(&task).await?;

        let worktree = PathBuf::from(&task.worktree_path);
        let commit_created = if self.vcs.has_uncommitted_changes(&worktree).await? {
            let message = self.commit_message(&task, iterations).await;
            self.vcs.commit_all(&worktree, &message).await?
        } else {
            false
        };

        let message = format!("Merge {} (task #{}): {}", task.branch_name, task.id, task.title);
        let resolved_files = match self.vcs.merge(&task.branch_name, &message).await? {
            MergeStatus::Clean => Vec::new(),
            MergeStatus::Conflicted(files) => {
                info!(count = files.len(), "Merge has conflicts, resolving");
                match self.resolve_and_confirm(&task, &files, &message, confirmer).await {
                    Ok(true) => files,
                    Ok(false) => {
                        self.vcs.abort_merge().await?;
                        info!("Conflict resolution declined, merge aborted");
                        return Ok(MergeOutcome::Declined { files });
                    }
                    Err(e) => {
                        if let Err(abort) = self.vcs.abort_merge().await {
                            warn!(error = %abort, "Failed to abort merge");
                        }
                        return Err(e);
                    }
                }
            }
        };

        record.mark_merged()?;
        info!(branch = %task.branch_name, "Task merged");
        self.remove_worktree(&task).await;

        Ok(MergeOutcome::Merged {
            commit_created,
            resolved_files,
        })
    }

    /// Push the current branch of a merged task and mark it `PUSHED`.
    ///
    /// Returns the pushed branch.
    #[instrument(skip_all, fields(task_id = record.id()))]
    pub async fn push(&self, record: &mut TaskRecord) -> MergeResult<String> {
        if record.status() != TaskStatus::Merged {
            return Err(MergeError::NotPushable {
                task_id: record.id(),
                status: record.status(),
            });
        }
        let branch = self.vcs.current_branch().await?;
        self.vcs.push(&branch).await?;
        record.mark_pushed()?;
        info!(%branch, "Task pushed");
        Ok(branch)
    }

    async fn check_preconditions(&self, task: &Task) -> MergeResult<()> {
        if task.status != TaskStatus::Completed {
            return Err(MergeError::NotMergeable {
                task_id: task.id,
                status: task.status,
            });
        }
        if self.vcs.has_uncommitted_changes(&self.repo_root).await? {
            return Err(MergeError::DirtyTarget {
                branch: self.vcs.current_branch().await?,
            });
        }
        let worktree = Path::new(&task.worktree_path);
        if !self.vcs.worktree_exists(worktree).await? {
            return Err(MergeError::MissingWorktree {
                task_id: task.id,
                path: worktree.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Resolve every conflicted file, then ask the operator. Returns the
    /// operator's answer; on `true` the merge is committed.
    async fn resolve_and_confirm(
        &self,
        task: &Task,
        files: &[String],
        message: &str,
        confirmer: &dyn MergeConfirmer,
    ) -> MergeResult<bool> {
        for file in files {
            self.resolve_file(file).await?;
        }
        if !confirmer.confirm(task, files).await {
            return Ok(false);
        }
        self.vcs.continue_merge(message).await?;
        Ok(true)
    }

    async fn resolve_file(&self, file: &str) -> MergeResult<()> {
        let path = self.repo_root.join(file);
        let conflicted = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MergeError::Io {
                path: path.clone(),
                source,
            })?;
        let history = self
            .vcs
            .file_history(file, HISTORY_DEPTH)
            .await
            .unwrap_or_else(|e| {
                warn!(file, error = %e, "No history for conflicted file");
                String::new()
            });

        let resolved = self
            .assistant
            .resolve_merge_conflict(&path, &history, &conflicted)
            .await
            .map_err(|e| MergeError::ResolutionFailed {
                file: file.to_string(),
                reason: e.to_string(),
            })?;
        if has_conflict_markers(&resolved) {
            return Err(MergeError::ResolutionFailed {
                file: file.to_string(),
                reason: "resolution still contains conflict markers".to_string(),
            });
        }

        tokio::fs::write(&path, resolved)
            .await
            .map_err(|source| MergeError::Io {
                path: path.clone(),
                source,
            })?;
        self.vcs.stage(file).await?;
        debug!(file, "Conflict resolved and staged");
        Ok(())
    }

    async fn commit_message(&self, task: &Task, iterations: &IterationManager) -> String {
        let recent = self
            .vcs
            .recent_commits(RECENT_COMMITS)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not read recent commits");
                Vec::new()
            });
        let summaries = iterations.summaries().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read iteration summaries");
            Vec::new()
        });
        let message = commit_message_or_fallback(
            self.assistant.as_ref(),
            &task.title,
            &task.description,
            &recent,
            &summaries,
        )
        .await;
        with_attribution(message, &self.config)
    }

    async fn remove_worktree(&self, task: &Task) {
        if !self.config.remove_worktree {
            return;
        }
        let worktree = Path::new(&task.worktree_path);
        if let Err(e) = self.vcs.remove_worktree(worktree).await {
            warn!(error = %e, "Failed to remove worktree after merge");
            return;
        }
        if let Err(e) = self.vcs.delete_branch(&task.branch_name).await {
            warn!(error = %e, "Failed to delete task branch after merge");
        }
    }
}

fn with_attribution(message: String, config: &MergeConfig) -> String {
    let trailer = config.attribution_trailer.trim();
    if !config.attribution || trailer.is_empty() {
        return message;
    }
    format!("{}\n\n{trailer}", message.trim_end())
}
