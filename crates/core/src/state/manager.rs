//! Task lifecycle coordination.
//!
//! The [`TaskManager`] is the entry point for every task operation. It ties
//! together the task store, the workflow library, the sandbox manager, the
//! git collaborator and the assistant. Each operation loads the task record,
//! checks preconditions before touching anything, and persists every state
//! change through [`TaskRecord`].

use crate::agents::adapters::MockAgent;
use crate::agents::assistant::{
    expand_iteration_or_fallback, expand_task_or_fallback, AgentAssistant, Assistant, TaskSummary,
};
use crate::agents::base::Agent;
use crate::agents::factory::AgentFactory;
use crate::config::{AppConfig, PROJECT_DIR};
use crate::error::{TaskError, TaskResult};
use crate::git::{task_branch, worktree_dir_name, GitCli, Vcs};
use crate::merge::{MergeConductor, MergeConfirmer, MergeOutcome};
use crate::sandbox::{backend_for, LogStream, SandboxHandle, SandboxManager, SandboxRequest};
use crate::state::error::TransitionError;
use crate::state::iteration::IterationManager;
use crate::state::store::TaskStore;
use crate::state::task::TaskRecord;
use crate::workflow::validation::validate_inputs;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tf_protocol::iteration_models::{Iteration, IterationState, IterationStatus};
use tf_protocol::task_models::{ExecutionStatus, Task, TaskStatus, TASK_SCHEMA_VERSION};
use tf_protocol::workflow_models::Workflow;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Parameters of a new task.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub description: String,
    /// Skips expansion when set.
    pub title: Option<String>,
    /// Defaults to the configured default workflow.
    pub workflow: Option<String>,
    /// Defaults to the configured agent tool.
    pub agent: Option<String>,
    pub inputs: BTreeMap<String, String>,
}

impl CreateTaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// One iteration with its latest status, as shown to users.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationDetails {
    #[serde(flatten)]
    pub iteration: Iteration,
    pub status: Option<IterationStatus>,
}

/// A task with all of its iterations.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetails {
    pub task: Task,
    pub iterations: Vec<IterationDetails>,
}

pub struct TaskManager {
    repo_root: PathBuf,
    config: Arc<AppConfig>,
    store: TaskStore,
    sandbox: SandboxManager,
    vcs: Arc<dyn Vcs>,
    assistant: Arc<dyn Assistant>,
}

impl TaskManager {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: AppConfig,
        sandbox: SandboxManager,
        vcs: Arc<dyn Vcs>,
        assistant: Arc<dyn Assistant>,
    ) -> Self {
        let repo_root = repo_root.into();
        Self {
            store: TaskStore::new(repo_root.join(PROJECT_DIR).join("tasks")),
            repo_root,
            config: Arc::new(config),
            sandbox,
            vcs,
            assistant,
        }
    }

    /// Wire up the collaborators named by the configuration: the configured
    /// container runtime, `git` in `repo_root`, and the configured agent as
    /// the assistant.
    ///
    /// If the agent tool has no adapter, assistance is disabled and every
    /// request takes its fallback.
    pub fn from_config(repo_root: impl Into<PathBuf>, config: AppConfig) -> Self {
        let repo_root = repo_root.into();
        let sandbox = SandboxManager::new(
            backend_for(config.global.sandbox.backend),
            config.global.sandbox.clone(),
        );
        let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new(&repo_root));

        let agent_config = &config.global.agent;
        let agent: Arc<dyn Agent> =
            match AgentFactory::create(&agent_config.tool, agent_config.model.clone()) {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(tool = %agent_config.tool, error = %e, "Assistant disabled, using fallbacks");
                    Arc::new(MockAgent::unavailable())
                }
            };
        let assistant: Arc<dyn Assistant> = Arc::new(
            AgentAssistant::new(agent, &repo_root).with_model(agent_config.model.clone()),
        );

        Self::new(repo_root, config, sandbox, vcs, assistant)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn iterations(&self, task_id: u64) -> IterationManager {
        IterationManager::new(self.store.iterations_dir(task_id), task_id)
    }

    /// Validate, expand and persist a new task with its first iteration.
    ///
    /// Invalid inputs are rejected before an id is allocated.
    #[instrument(skip_all)]
    pub async fn create_task(&self, request: CreateTaskRequest) -> TaskResult<Task> {
        let workflow_name = request
            .workflow
            .clone()
            .unwrap_or_else(|| self.config.global.default_workflow.clone());
        let workflow = self.config.workflows.require(&workflow_name)?;

        let mut candidate = request.inputs.clone();
        candidate
            .entry("description".to_string())
            .or_insert_with(|| request.description.clone());
        if let Some(title) = &request.title {
            candidate
                .entry("title".to_string())
                .or_insert_with(|| title.clone());
        }
        let validation = validate_inputs(workflow, &candidate);
        if !validation.valid {
            return Err(TaskError::InvalidInputs {
                workflow: workflow_name,
                validation,
            });
        }

        let summary = match request.title {
            Some(title) => TaskSummary {
                title,
                description: request.description.trim().to_string(),
            },
            None if self.config.global.agent.expand_tasks => {
                expand_task_or_fallback(self.assistant.as_ref(), &request.description).await
            }
            None => TaskSummary::from_raw(&request.description),
        };

        let source_branch = self.vcs.current_branch().await?;
        let id = self.store.allocate_id().await?;
        let task = Task {
            id,
            uuid: Uuid::new_v4(),
            title: summary.title.clone(),
            description: summary.description.clone(),
            workflow_name,
            agent: request
                .agent
                .unwrap_or_else(|| self.config.global.agent.tool.clone()),
            inputs: request.inputs,
            source_branch,
            branch_name: task_branch(id),
            worktree_path: self.worktree_path(id).display().to_string(),
            container_id: None,
            execution_status: ExecutionStatus::Pending,
            status: TaskStatus::New,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            merged_at: None,
            pushed_at: None,
            iterations: 1,
            restart_count: 0,
            last_restart_at: None,
            version: TASK_SCHEMA_VERSION.to_string(),
        };
        let record = self.store.create(task)?;
        self.iterations(id)
            .create_initial(&summary.title, &summary.description)?;

        info!(task_id = id, title = %summary.title, "Task created");
        Ok(record.into_task())
    }

    /// Prepare the working copy and launch the latest iteration of a `NEW`
    /// task.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub async fn start_task(&self, task_id: u64) -> TaskResult<Task> {
        let mut record = self.store.load(task_id)?;
        ensure_transition(&record, TaskStatus::InProgress)?;
        let workflow = self.config.workflows.require(&record.task().workflow_name)?;
        let iteration = self.iterations(task_id).load(record.task().iterations)?;
        self.ensure_worktree(record.task()).await?;

        record.mark_in_progress()?;
        self.launch(&mut record, &iteration, workflow).await?;
        Ok(record.into_task())
    }

    /// Wait for the running sandbox to exit and record the outcome.
    ///
    /// With a `timeout`, a sandbox still running at the deadline is stopped
    /// and the task fails. Tasks that are not running are returned as-is.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub async fn wait_for_task(&self, task_id: u64, timeout: Option<Duration>) -> TaskResult<Task> {
        let mut record = self.store.load(task_id)?;
        if !record.status().is_active() {
            return Ok(record.into_task());
        }
        let handle = self.sandbox_handle(record.task())?;
        let number = record.task().iterations;
        let iterations = self.iterations(task_id);
        let runtime = |source| TaskError::SandboxRuntime { task_id, source };

        let exit = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.sandbox.wait(&handle))
                .await
                .ok()
                .transpose()
                .map_err(runtime)?,
            None => Some(self.sandbox.wait(&handle).await.map_err(runtime)?),
        };

        match exit {
            None => {
                warn!(task_id, "Sandbox timed out, stopping it");
                self.sandbox.stop(&handle).await.map_err(runtime)?;
                record.set_execution_status(ExecutionStatus::Stopped)?;
                fail_iteration(&iterations, number, "sandbox timed out");
                record.mark_failed()?;
            }
            Some(code) => {
                record.set_execution_status(ExecutionStatus::Exited)?;
                let reported = iterations.read_status(number).ok().map(|s| s.status);
                if code == 0 && reported == Some(IterationState::Completed) {
                    record.mark_completed()?;
                } else {
                    if !reported.is_some_and(IterationState::is_terminal) {
                        fail_iteration(
                            &iterations,
                            number,
                            &format!("sandbox exited with code {code}"),
                        );
                    }
                    record.mark_failed()?;
                }
                info!(task_id, code, status = %record.status(), "Sandbox exited");
            }
        }

        if self.config.global.sandbox.auto_remove {
            record.set_sandbox(None, ExecutionStatus::Removed)?;
        }
        Ok(record.into_task())
    }

    /// Run a refinement cycle on a completed or failed task.
    ///
    /// The new iteration is numbered and persisted before its sandbox is
    /// created.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub async fn iterate_task(&self, task_id: u64, instructions: &str) -> TaskResult<Task> {
        let mut record = self.store.load(task_id)?;
        ensure_transition(&record, TaskStatus::Iterating)?;
        let workflow = self.config.workflows.require(&record.task().workflow_name)?;
        let iterations = self.iterations(task_id);
        let previous = iterations.previous_context()?;
        self.ensure_worktree(record.task()).await?;

        let summary =
            expand_iteration_or_fallback(self.assistant.as_ref(), instructions, previous.as_ref())
                .await;
        let number = record.task().iterations + 1;
        let iteration =
            iterations.create_iteration(number, &summary.title, &summary.description, previous)?;
        record.increment_iteration()?;
        record.mark_iterating()?;

        self.launch(&mut record, &iteration, workflow).await?;
        Ok(record.into_task())
    }

    /// Return a `NEW` or `FAILED` task to `NEW` and discard its sandbox.
    ///
    /// Any other status is rejected without changes. Call
    /// [`start_task`](Self::start_task) to run it again.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub async fn restart_task(&self, task_id: u64) -> TaskResult<Task> {
        let mut record = self.store.load(task_id)?;
        let stale = SandboxHandle {
            name: record.task().sandbox_name(),
            id: record.task().container_id.clone(),
        };
        record.restart(Utc::now())?;
        if let Err(e) = self.sandbox.remove(&stale).await {
            warn!(task_id, error = %e, "Failed to remove previous sandbox");
        }
        Ok(record.into_task())
    }

    /// Merge the task branch into the current branch.
    pub async fn merge_task(
        &self,
        task_id: u64,
        confirmer: &dyn MergeConfirmer,
    ) -> TaskResult<MergeOutcome> {
        let mut record = self.store.load(task_id)?;
        let outcome = self
            .conductor()
            .merge(&mut record, &self.iterations(task_id), confirmer)
            .await?;
        Ok(outcome)
    }

    /// Push a merged task and return the pushed branch.
    pub async fn push_task(&self, task_id: u64) -> TaskResult<String> {
        let mut record = self.store.load(task_id)?;
        Ok(self.conductor().push(&mut record).await?)
    }

    pub async fn task_logs(&self, task_id: u64) -> TaskResult<String> {
        let task = self.store.load(task_id)?.into_task();
        let handle = self.sandbox_handle(&task)?;
        self.sandbox
            .logs(&handle)
            .await
            .map_err(|source| TaskError::SandboxRuntime { task_id, source })
    }

    /// Stream the sandbox output. Dropping the stream stops following
    /// without affecting the sandbox.
    pub fn follow_task_logs(&self, task_id: u64) -> TaskResult<LogStream> {
        let task = self.store.load(task_id)?.into_task();
        let handle = self.sandbox_handle(&task)?;
        Ok(self.sandbox.follow_logs(&handle))
    }

    /// Attach an interactive shell to the task's sandbox. Task state is not
    /// changed.
    pub async fn open_shell(&self, task_id: u64) -> TaskResult<()> {
        let task = self.store.load(task_id)?.into_task();
        let handle = self.sandbox_handle(&task)?;
        self.sandbox
            .open_interactive_shell(&handle)
            .await
            .map_err(|source| TaskError::SandboxRuntime { task_id, source })
    }

    pub fn list_tasks(&self) -> TaskResult<Vec<Task>> {
        Ok(self.store.list()?)
    }

    pub fn show_task(&self, task_id: u64) -> TaskResult<TaskDetails> {
        let task = self.store.load(task_id)?.into_task();
        let iterations = self.iterations(task_id);
        let mut details = Vec::new();
        for number in iterations.iteration_numbers()? {
            let iteration = iterations.load(number)?;
            let status = match iterations.read_status(number) {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(task_id, number, error = %e, "Unreadable iteration status");
                    None
                }
            };
            details.push(IterationDetails { iteration, status });
        }
        Ok(TaskDetails {
            task,
            iterations: details,
        })
    }

    /// Remove the task's sandbox. A task still running is marked failed.
    #[instrument(skip_all, fields(task_id = task_id))]
    pub async fn remove_sandbox(&self, task_id: u64) -> TaskResult<Task> {
        let mut record = self.store.load(task_id)?;
        let handle = self.sandbox_handle(record.task())?;
        self.sandbox
            .remove(&handle)
            .await
            .map_err(|source| TaskError::SandboxRuntime { task_id, source })?;
        record.set_sandbox(None, ExecutionStatus::Removed)?;
        if record.status().is_active() {
            let number = record.task().iterations;
            fail_iteration(&self.iterations(task_id), number, "sandbox removed");
            record.mark_failed()?;
        }
        Ok(record.into_task())
    }

    fn worktree_path(&self, task_id: u64) -> PathBuf {
        self.repo_root
            .join(&self.config.global.worktree_dir)
            .join(worktree_dir_name(task_id))
    }

    fn conductor(&self) -> MergeConductor {
        MergeConductor::new(
            Arc::clone(&self.vcs),
            Arc::clone(&self.assistant),
            &self.repo_root,
            self.config.global.merge.clone(),
        )
    }

    /// Recreate the task's working copy if it is missing.
    async fn ensure_worktree(&self, task: &Task) -> TaskResult<()> {
        let path = Path::new(&task.worktree_path);
        let worktree = |source| TaskError::Worktree {
            task_id: task.id,
            source,
        };
        if self.vcs.worktree_exists(path).await.map_err(worktree)? {
            return Ok(());
        }
        self.vcs
            .create_worktree(path, &task.branch_name, &task.source_branch)
            .await
            .map_err(worktree)?;
        info!(task_id = task.id, path = %path.display(), "Worktree created");
        Ok(())
    }

    /// Create and start the sandbox for `iteration`. On any failure the
    /// task is reset to `NEW`, the iteration is marked failed and no
    /// container id remains on the record.
    async fn launch(
        &self,
        record: &mut TaskRecord,
        iteration: &Iteration,
        workflow: &Workflow,
    ) -> TaskResult<()> {
        let launched = self.create_and_start(record, iteration, workflow).await;
        if let Err(e) = &launched {
            let task_id = record.id();
            warn!(task_id, error = %e, "Launch failed, resetting task to NEW");
            fail_iteration(&self.iterations(task_id), iteration.iteration, &e.to_string());
            if let Err(e) = record.reset_to_new() {
                warn!(task_id, error = %e, "Failed to reset task");
            }
        }
        launched
    }

    async fn create_and_start(
        &self,
        record: &mut TaskRecord,
        iteration: &Iteration,
        workflow: &Workflow,
    ) -> TaskResult<()> {
        let task_id = record.id();
        let number = iteration.iteration;
        let iterations = self.iterations(task_id);
        iterations.reset_status(number)?;
        let output_dir = iterations.iteration_dir(number);

        let request = SandboxRequest {
            task: record.task(),
            iteration,
            workflow,
            output_dir: &output_dir,
            model: self.config.global.agent.model.as_deref(),
        };
        let sandbox_failed = |op, source| TaskError::Sandbox {
            task_id,
            op,
            source,
        };
        let handle = self
            .sandbox
            .create(request)
            .await
            .map_err(|source| sandbox_failed("create", source))?;
        record.set_sandbox(handle.id.clone(), ExecutionStatus::Pending)?;

        let container_id = self
            .sandbox
            .start(&handle)
            .await
            .map_err(|source| sandbox_failed("start", source))?;
        record.set_sandbox(Some(container_id), ExecutionStatus::Running)?;
        info!(task_id, iteration = number, "Sandbox running");
        Ok(())
    }

    fn sandbox_handle(&self, task: &Task) -> TaskResult<SandboxHandle> {
        if task.container_id.is_none() && !task.status.is_active() {
            return Err(TaskError::NoSandbox { task_id: task.id });
        }
        Ok(SandboxHandle {
            name: task.sandbox_name(),
            id: task.container_id.clone(),
        })
    }
}

fn ensure_transition(record: &TaskRecord, next: TaskStatus) -> TaskResult<()> {
    if record.status().can_transition_to(next) {
        Ok(())
    } else {
        Err(TransitionError {
            task_id: record.id(),
            from: record.status(),
            to: next,
        }
        .into())
    }
}

/// Record a failure in the iteration status unless it already ended.
fn fail_iteration(iterations: &IterationManager, number: u32, error: &str) {
    let result = iterations.status_tracker(number).and_then(|mut tracker| {
        if tracker.status().status.is_terminal() {
            Ok(())
        } else {
            let step = tracker.status().current_step.clone();
            tracker.fail(&step, error)
        }
    });
    if let Err(e) = result {
        warn!(iteration = number, error = %e, "Failed to record iteration failure");
    }
}
