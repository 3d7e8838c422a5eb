//! In-memory stand-ins for git, the assistant and the operator.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tf_core::agents::assistant::{Assistant, TaskSummary};
use tf_core::agents::base::AgentError;
use tf_core::git::{GitError, GitResult, MergeStatus, Vcs};
use tf_core::merge::MergeConfirmer;
use tf_protocol::task_models::Task;

#[derive(Default)]
struct RepoState {
    branch: String,
    worktrees: BTreeSet<PathBuf>,
    branches: BTreeSet<String>,
    dirty: BTreeSet<PathBuf>,
    conflicts: Vec<String>,
    merging: bool,
    fail_worktree: bool,
    calls: Vec<String>,
}

/// Git repository kept in memory.
///
/// Worktrees are also created on disk so sandboxes can mount them. Every
/// mutating call is recorded.
#[derive(Clone)]
#[allow(dead_code)]
pub struct FakeVcs {
    state: Arc<Mutex<RepoState>>,
}

#[allow(dead_code)]
impl FakeVcs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RepoState {
                branch: "main".to_string(),
                ..RepoState::default()
            })),
        }
    }

    /// The next merge stops with these files conflicted.
    pub fn with_conflicts<I, S>(self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().conflicts = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing_worktrees(self) -> Self {
        self.state().fail_worktree = true;
        self
    }

    pub fn mark_dirty(&self, dir: &Path) {
        self.state().dirty.insert(dir.to_path_buf());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn is_merging(&self) -> bool {
        self.state().merging
    }

    fn state(&self) -> MutexGuard<'_, RepoState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> GitResult<()> {
        self.record(format!("worktree add {} {branch} {base}", path.display()));
        if self.state().fail_worktree {
            return Err(GitError::CommandFailed {
                args: "worktree add".to_string(),
                status: "exit status: 128".to_string(),
                stderr: "fatal: invalid reference".to_string(),
            });
        }
        std::fs::create_dir_all(path).map_err(|source| GitError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut state = self.state();
        state.worktrees.insert(path.to_path_buf());
        state.branches.insert(branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> GitResult<()> {
        self.record(format!("worktree remove {}", path.display()));
        self.state().worktrees.remove(path);
        Ok(())
    }

    async fn worktree_exists(&self, path: &Path) -> GitResult<bool> {
        Ok(self.state().worktrees.contains(path))
    }

    async fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        Ok(self.state().branches.contains(branch))
    }

    async fn current_branch(&self) -> GitResult<String> {
        Ok(self.state().branch.clone())
    }

    async fn has_uncommitted_changes(&self, dir: &Path) -> GitResult<bool> {
        Ok(self.state().dirty.contains(dir))
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> GitResult<bool> {
        self.record(format!("commit {message}"));
        Ok(self.state().dirty.remove(dir))
    }

    async fn recent_commits(&self, _limit: usize) -> GitResult<Vec<String>> {
        Ok(vec!["Initial commit".to_string()])
    }

    async fn merge(&self, branch: &str, _message: &str) -> GitResult<MergeStatus> {
        self.record(format!("merge {branch}"));
        let mut state = self.state();
        if state.conflicts.is_empty() {
            return Ok(MergeStatus::Clean);
        }
        state.merging = true;
        Ok(MergeStatus::Conflicted(state.conflicts.clone()))
    }

    async fn conflicted_files(&self) -> GitResult<Vec<String>> {
        Ok(self.state().conflicts.clone())
    }

    async fn stage(&self, file: &str) -> GitResult<()> {
        self.record(format!("add {file}"));
        Ok(())
    }

    async fn continue_merge(&self, _message: &str) -> GitResult<()> {
        self.record("merge --continue".to_string());
        self.state().merging = false;
        Ok(())
    }

    async fn abort_merge(&self) -> GitResult<()> {
        self.record("merge --abort".to_string());
        self.state().merging = false;
        Ok(())
    }

    async fn file_history(&self, file: &str, _limit: usize) -> GitResult<String> {
        Ok(format!("abc123 edit {file}"))
    }

    async fn push(&self, branch: &str) -> GitResult<()> {
        self.record(format!("push {branch}"));
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> GitResult<()> {
        self.record(format!("branch -D {branch}"));
        self.state().branches.remove(branch);
        Ok(())
    }
}

/// Assistant with queued answers. An empty queue answers with an error,
/// so callers fall back.
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedAssistant {
    summaries: Mutex<VecDeque<TaskSummary>>,
    resolutions: Mutex<VecDeque<String>>,
}

#[allow(dead_code)]
impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(self, title: &str, description: &str) -> Self {
        self.summaries.lock().unwrap().push_back(TaskSummary {
            title: title.to_string(),
            description: description.to_string(),
        });
        self
    }

    pub fn with_resolution(self, content: &str) -> Self {
        self.resolutions.lock().unwrap().push_back(content.to_string());
        self
    }

    fn next_summary(&self) -> Result<TaskSummary, AgentError> {
        self.summaries
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::NotAvailable("scripted".to_string()))
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn expand_task(&self, _description: &str) -> Result<TaskSummary, AgentError> {
        self.next_summary()
    }

    async fn expand_iteration_instructions(
        &self,
        _instructions: &str,
        _prior_plan: Option<&str>,
        _prior_changes: Option<&str>,
    ) -> Result<TaskSummary, AgentError> {
        self.next_summary()
    }

    async fn resolve_merge_conflict(
        &self,
        _file: &Path,
        _history: &str,
        _conflicted: &str,
    ) -> Result<String, AgentError> {
        self.resolutions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::NotAvailable("scripted".to_string()))
    }

    async fn generate_commit_message(
        &self,
        _title: &str,
        _description: &str,
        _recent_commits: &[String],
        _summaries: &[String],
    ) -> Result<String, AgentError> {
        Err(AgentError::NotAvailable("scripted".to_string()))
    }
}

/// Confirmer that records which files it was asked about.
#[allow(dead_code)]
pub struct RecordingConfirmer {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingConfirmer {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl MergeConfirmer for RecordingConfirmer {
    async fn confirm(&self, _task: &Task, resolved_files: &[String]) -> bool {
        self.asked.lock().unwrap().extend_from_slice(resolved_files);
        self.answer
    }
}
