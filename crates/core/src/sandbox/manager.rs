//! Sandbox lifecycle for task iterations.

use crate::agents::agent_type::AgentType;
use crate::sandbox::descriptor::{self, ExecutionDescriptor, ENTRYPOINT_FILE};
use crate::sandbox::error::SandboxResult;
use crate::sandbox::{LogStream, Mount, SandboxBackend, SandboxHandle, SandboxSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tf_protocol::config_models::SandboxConfig;
use tf_protocol::iteration_models::Iteration;
use tf_protocol::task_models::Task;
use tf_protocol::workflow_models::Workflow;
use tracing::{debug, info, instrument, warn};

/// Home directory of the agent user inside the sandbox image.
pub const SANDBOX_HOME: &str = "/home/agent";

/// Inputs for creating the sandbox of one iteration.
#[derive(Debug, Clone, Copy)]
pub struct SandboxRequest<'a> {
    pub task: &'a Task,
    pub iteration: &'a Iteration,
    pub workflow: &'a Workflow,
    /// Host directory of the iteration (`tasks/<id>/iterations/<n>`).
    pub output_dir: &'a Path,
    pub model: Option<&'a str>,
}

/// Creates and drives task sandboxes through a [`SandboxBackend`].
#[derive(Clone)]
pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    config: SandboxConfig,
    home: Option<PathBuf>,
    host_env: Option<BTreeMap<String, String>>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>, config: SandboxConfig) -> Self {
        Self {
            backend,
            config,
            home: dirs::home_dir(),
            host_env: None,
        }
    }

    /// Look for credential files under `home` instead of the user's home.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Read pass-through variables from `env` instead of the process environment.
    pub fn with_host_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.host_env = Some(env);
        self
    }

    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    /// Write the execution descriptor and create the sandbox.
    ///
    /// Any existing sandbox with the task's name is removed first. If
    /// creation fails, whatever the runtime left behind under that name is
    /// removed before the error is returned.
    #[instrument(skip_all, fields(task_id = request.task.id, iteration = request.iteration.iteration))]
    pub async fn create(&self, request: SandboxRequest<'_>) -> SandboxResult<SandboxHandle> {
        let descriptor = ExecutionDescriptor::new(
            request.task,
            request.iteration,
            request.model.map(str::to_string),
            &self.config.output_mount,
        );
        descriptor::write(
            request.output_dir,
            &descriptor,
            request.workflow,
            &self.config.workspace_mount,
        )?;

        let spec = self.build_spec(request);
        if self.backend.exists(&spec.name).await? {
            warn!(name = %spec.name, "Removing stale sandbox");
            self.backend.remove(&SandboxHandle::named(&spec.name)).await?;
        }

        match self.backend.create(&spec).await {
            Ok(handle) => {
                info!(name = %handle.name, id = ?handle.id, "Sandbox created");
                Ok(handle)
            }
            Err(e) => {
                self.cleanup(&spec.name).await;
                Err(e)
            }
        }
    }

    /// Start a created sandbox. On failure the sandbox is removed.
    pub async fn start(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        match self.backend.start(handle).await {
            Ok(id) => {
                info!(name = %handle.name, %id, "Sandbox started");
                Ok(id)
            }
            Err(e) => {
                self.cleanup(&handle.name).await;
                Err(e)
            }
        }
    }

    pub async fn stop(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.backend.stop(handle).await?;
        info!(name = %handle.name, "Sandbox stopped");
        Ok(())
    }

    pub async fn remove(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.backend.remove(handle).await?;
        info!(name = %handle.name, "Sandbox removed");
        Ok(())
    }

    pub async fn wait(&self, handle: &SandboxHandle) -> SandboxResult<i64> {
        self.backend.wait(handle).await
    }

    pub async fn logs(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        self.backend.logs(handle).await
    }

    pub fn follow_logs(&self, handle: &SandboxHandle) -> LogStream {
        self.backend.follow_logs(handle)
    }

    pub async fn open_interactive_shell(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.backend.open_interactive_shell(handle).await
    }

    /// Container spec for one iteration.
    pub fn build_spec(&self, request: SandboxRequest<'_>) -> SandboxSpec {
        let task = request.task;
        let mut mounts = vec![
            Mount {
                source: PathBuf::from(&task.worktree_path),
                target: self.config.workspace_mount.clone(),
                read_only: false,
            },
            Mount {
                source: request.output_dir.to_path_buf(),
                target: self.config.output_mount.clone(),
                read_only: false,
            },
        ];
        mounts.extend(self.credential_mounts(&task.agent));

        let labels = BTreeMap::from([
            ("taskforge.task-id".to_string(), task.id.to_string()),
            (
                "taskforge.iteration".to_string(),
                request.iteration.iteration.to_string(),
            ),
        ]);

        SandboxSpec {
            name: task.sandbox_name(),
            image: self.config.image.clone(),
            workdir: self.config.workspace_mount.clone(),
            mounts,
            env: self.environment(task, request.iteration.iteration),
            labels,
            command: vec![
                "sh".to_string(),
                format!("{}/{ENTRYPOINT_FILE}", self.config.output_mount),
            ],
            auto_remove: self.config.auto_remove,
        }
    }

    /// Agent variables, then taskforge variables, then user overrides.
    fn environment(&self, task: &Task, iteration: u32) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(agent_type) = AgentType::from_tool_name(&task.agent) {
            for var in agent_type.api_key_vars() {
                if let Some(value) = self.host_var(var) {
                    env.insert((*var).to_string(), value);
                }
            }
        }
        env.insert("HOME".to_string(), SANDBOX_HOME.to_string());
        env.insert("TASKFORGE_TASK_ID".to_string(), task.id.to_string());
        env.insert("TASKFORGE_ITERATION".to_string(), iteration.to_string());
        env.insert(
            "TASKFORGE_WORKSPACE".to_string(),
            self.config.workspace_mount.clone(),
        );
        env.insert("TASKFORGE_OUTPUT".to_string(), self.config.output_mount.clone());
        for (key, value) in &self.config.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    fn host_var(&self, name: &str) -> Option<String> {
        match &self.host_env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
        .filter(|v| !v.is_empty())
    }

    /// Read-only binds for the agent's credential files that exist on the host.
    fn credential_mounts(&self, agent: &str) -> Vec<Mount> {
        let mut mounts = Vec::new();
        let Some(home) = &self.home else {
            debug!("No home directory, skipping credential mounts");
            return mounts;
        };

        let known = AgentType::from_tool_name(agent)
            .map(AgentType::credential_files)
            .unwrap_or_default();
        for relative in known {
            let source = home.join(relative);
            if source.exists() {
                mounts.push(Mount {
                    source,
                    target: format!("{SANDBOX_HOME}/{relative}"),
                    read_only: true,
                });
            } else {
                debug!(path = %source.display(), "Credential file not present");
            }
        }

        for entry in &self.config.extra_credentials {
            match parse_credential(entry, home) {
                Some(mount) if mount.source.exists() => mounts.push(mount),
                Some(mount) => {
                    warn!(path = %mount.source.display(), "Configured credential file not found")
                }
                None => warn!(entry = %entry, "Ignoring malformed credential entry"),
            }
        }
        mounts
    }

    async fn cleanup(&self, name: &str) {
        if let Err(e) = self.backend.remove(&SandboxHandle::named(name)).await {
            warn!(name, error = %e, "Failed to clean up sandbox");
        }
    }
}

/// Parse `host[:container]`, expanding a leading `~/` on the host side.
///
/// Without an explicit target, files under the home directory keep their
/// relative location under the sandbox home; others keep their path.
fn parse_credential(entry: &str, home: &Path) -> Option<Mount> {
    let (host, target) = match entry.split_once(':') {
        Some((host, target)) => (host.trim(), Some(target.trim())),
        None => (entry.trim(), None),
    };
    if host.is_empty() || target == Some("") {
        return None;
    }

    let (source, relative) = match host.strip_prefix("~/") {
        Some(rest) => (home.join(rest), Some(rest.to_string())),
        None => {
            let source = PathBuf::from(host);
            let relative = source
                .strip_prefix(home)
                .ok()
                .map(|p| p.to_string_lossy().into_owned());
            (source, relative)
        }
    };
    let target = match (target, relative) {
        (Some(target), _) => target.to_string(),
        (None, Some(relative)) => format!("{SANDBOX_HOME}/{relative}"),
        (None, None) => source.to_string_lossy().into_owned(),
    };
    Some(Mount {
        source,
        target,
        read_only: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{MockBackend, SandboxOp};
    use crate::sandbox::SandboxError;
    use chrono::Utc;
    use tempfile::tempdir;
    use tf_protocol::task_models::{ExecutionStatus, TaskStatus, TASK_SCHEMA_VERSION};
    use uuid::Uuid;

    fn task(worktree: &Path) -> Task {
        Task {
            id: 7,
            uuid: Uuid::new_v4(),
            title: "Fix bug".to_string(),
            description: "fix bug".to_string(),
            workflow_name: "default".to_string(),
            agent: "claude".to_string(),
            inputs: BTreeMap::from([("description".to_string(), "fix bug".to_string())]),
            source_branch: "main".to_string(),
            branch_name: "taskforge/task-7".to_string(),
            worktree_path: worktree.display().to_string(),
            container_id: None,
            execution_status: ExecutionStatus::Pending,
            status: TaskStatus::InProgress,
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
        }
    }

    fn iteration() -> Iteration {
        Iteration {
            id: 7,
            iteration: 1,
            title: "Fix bug".to_string(),
            description: "fix bug".to_string(),
            created_at: Utc::now(),
            previous_context: None,
            version: "1.0".to_string(),
        }
    }

    fn workflow() -> Workflow {
        Workflow::from_yaml("name: default\nsteps:\n  - {id: a, prompt: x}\n").unwrap()
    }

    struct Fixture {
        dir: tempfile::TempDir,
        task: Task,
        iteration: Iteration,
        workflow: Workflow,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let task = task(&dir.path().join("wt"));
            Self {
                dir,
                task,
                iteration: iteration(),
                workflow: workflow(),
            }
        }

        fn output_dir(&self) -> PathBuf {
            self.dir.path().join("iterations/1")
        }

        fn home(&self) -> PathBuf {
            self.dir.path().join("home")
        }

        fn request<'a>(&'a self, output_dir: &'a Path) -> SandboxRequest<'a> {
            SandboxRequest {
                task: &self.task,
                iteration: &self.iteration,
                workflow: &self.workflow,
                output_dir,
                model: None,
            }
        }
    }

    fn manager(backend: &MockBackend, fixture: &Fixture, config: SandboxConfig) -> SandboxManager {
        SandboxManager::new(Arc::new(backend.clone()), config)
            .with_home(Some(fixture.home()))
            .with_host_env(BTreeMap::from([
                ("ANTHROPIC_API_KEY".to_string(), "sk-host".to_string()),
                ("OPENAI_API_KEY".to_string(), "unused".to_string()),
            ]))
    }

    #[tokio::test]
    async fn test_create_writes_descriptor_and_spec() {
        let fixture = Fixture::new();
        let home = fixture.home();
        std::fs::create_dir_all(home.join(".claude")).unwrap();
        std::fs::write(home.join(".claude.json"), "{}").unwrap();
        let backend = MockBackend::new();
        let manager = manager(&backend, &fixture, SandboxConfig::default());
        let output_dir = fixture.output_dir();

        let handle = manager.create(fixture.request(&output_dir)).await.unwrap();

        assert_eq!(handle.name, "taskforge-task-7");
        assert!(output_dir.join("entrypoint.sh").exists());
        assert!(output_dir.join("inputs.json").exists());
        assert!(output_dir.join("workflow.yaml").exists());

        let spec = backend.container("taskforge-task-7").unwrap().spec;
        assert_eq!(spec.env["ANTHROPIC_API_KEY"], "sk-host");
        assert!(!spec.env.contains_key("OPENAI_API_KEY"));
        assert_eq!(spec.env["TASKFORGE_TASK_ID"], "7");
        assert_eq!(spec.env["TASKFORGE_OUTPUT"], "/taskforge/output");
        assert_eq!(spec.command, vec!["sh", "/taskforge/output/entrypoint.sh"]);
        let creds: Vec<_> = spec.mounts.iter().filter(|m| m.read_only).collect();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].target, "/home/agent/.claude.json");
    }

    #[tokio::test]
    async fn test_user_env_overrides_win() {
        let fixture = Fixture::new();
        let backend = MockBackend::new();
        let mut config = SandboxConfig::default();
        config
            .env
            .insert("ANTHROPIC_API_KEY".to_string(), "sk-user".to_string());
        config
            .env
            .insert("TASKFORGE_OUTPUT".to_string(), "/custom".to_string());
        let manager = manager(&backend, &fixture, config);

        let spec = manager.build_spec(fixture.request(&fixture.output_dir()));

        assert_eq!(spec.env["ANTHROPIC_API_KEY"], "sk-user");
        assert_eq!(spec.env["TASKFORGE_OUTPUT"], "/custom");
    }

    #[tokio::test]
    async fn test_create_twice_replaces_stale_sandbox() {
        let fixture = Fixture::new();
        let backend = MockBackend::new();
        let manager = manager(&backend, &fixture, SandboxConfig::default());
        let output_dir = fixture.output_dir();

        let first = manager.create(fixture.request(&output_dir)).await.unwrap();
        let second = manager.create(fixture.request(&output_dir)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(backend.container_names(), vec!["taskforge-task-7"]);
        assert!(backend.calls().contains(&"rm:taskforge-task-7".to_string()));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_nothing_behind() {
        let fixture = Fixture::new();
        let backend = MockBackend::new()
            .fail_on(SandboxOp::Create)
            .leave_residue_on_create_failure();
        let manager = manager(&backend, &fixture, SandboxConfig::default());

        let result = manager.create(fixture.request(&fixture.output_dir())).await;

        assert!(matches!(result, Err(SandboxError::CommandFailed { op: "create", .. })));
        assert!(backend.container_names().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_removes_sandbox() {
        let fixture = Fixture::new();
        let backend = MockBackend::new().fail_on(SandboxOp::Start);
        let manager = manager(&backend, &fixture, SandboxConfig::default());

        let handle = manager.create(fixture.request(&fixture.output_dir())).await.unwrap();
        assert!(manager.start(&handle).await.is_err());
        assert!(backend.container_names().is_empty());
    }

    #[test]
    fn test_parse_credential_entries() {
        let home = Path::new("/home/dev");

        let mount = parse_credential("~/.config/gh/hosts.yml", home).unwrap();
        assert_eq!(mount.source, PathBuf::from("/home/dev/.config/gh/hosts.yml"));
        assert_eq!(mount.target, "/home/agent/.config/gh/hosts.yml");
        assert!(mount.read_only);

        let mount = parse_credential("/etc/token:/run/token", home).unwrap();
        assert_eq!(mount.target, "/run/token");

        let mount = parse_credential("/etc/token", home).unwrap();
        assert_eq!(mount.target, "/etc/token");

        assert!(parse_credential("/etc/token:", home).is_none());
        assert!(parse_credential("", home).is_none());
    }
}
