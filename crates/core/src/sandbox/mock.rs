//! In-memory sandbox backend for tests.

use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::sandbox::{LogStream, SandboxBackend, SandboxHandle, SandboxSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOp {
    Create,
    Start,
    Stop,
    Remove,
    Wait,
    Logs,
}

impl SandboxOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Remove => "rm",
            Self::Wait => "wait",
            Self::Logs => "logs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    pub id: String,
    pub spec: SandboxSpec,
    pub running: bool,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    calls: Vec<String>,
    failures: HashSet<SandboxOp>,
    /// A failing `create` still registers the container, like a runtime
    /// that died after allocating it.
    residue_on_create_failure: bool,
    next_id: u64,
    exit_code: i64,
    /// How long `wait` blocks before the container exits.
    wait_delay: Option<Duration>,
    log_lines: Vec<String>,
}

/// Recording backend with failure injection.
///
/// Containers live in memory keyed by name. Every call is recorded as
/// `"<op>:<target>"`.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail.
    pub fn fail_on(self, op: SandboxOp) -> Self {
        self.inject_failure(op);
        self
    }

    /// Make every later call of `op` fail on a backend that is already in
    /// use.
    pub fn inject_failure(&self, op: SandboxOp) {
        self.state().failures.insert(op);
    }

    /// Let a failing `create` leave a half-created container behind.
    pub fn leave_residue_on_create_failure(self) -> Self {
        self.state().residue_on_create_failure = true;
        self
    }

    /// Exit code reported by `wait`.
    pub fn with_exit_code(self, code: i64) -> Self {
        self.state().exit_code = code;
        self
    }

    /// Keep `wait` pending for `delay`, like a long-running agent.
    pub fn with_wait_delay(self, delay: Duration) -> Self {
        self.state().wait_delay = Some(delay);
        self
    }

    /// Lines served by `logs` and `follow_logs`.
    pub fn with_logs<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().log_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.state().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, op: SandboxOp, target: &str) -> SandboxResult<()> {
        let mut state = self.state();
        state.calls.push(format!("{}:{target}", op.as_str()));
        if state.failures.contains(&op) {
            return Err(SandboxError::CommandFailed {
                binary: "mock".to_string(),
                op: op.as_str(),
                target: target.to_string(),
                status: "exit status: 125".to_string(),
                stderr: format!("injected {} failure", op.as_str()),
            });
        }
        Ok(())
    }

    fn find_name(state: &MockState, handle: &SandboxHandle) -> Option<String> {
        if state.containers.contains_key(&handle.name) {
            return Some(handle.name.clone());
        }
        let id = handle.id.as_deref()?;
        state
            .containers
            .values()
            .find(|c| c.id == id)
            .map(|c| c.spec.name.clone())
    }

    fn insert(state: &mut MockState, spec: &SandboxSpec) -> String {
        state.next_id += 1;
        let id = format!("mock{:04}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
            },
        );
        id
    }

    fn missing(op: SandboxOp, handle: &SandboxHandle) -> SandboxError {
        SandboxError::CommandFailed {
            binary: "mock".to_string(),
            op: op.as_str(),
            target: handle.target().to_string(),
            status: "exit status: 1".to_string(),
            stderr: format!("No such container: {}", handle.target()),
        }
    }
}

#[async_trait]
impl SandboxBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn exists(&self, name: &str) -> SandboxResult<bool> {
        Ok(self.state().containers.contains_key(name))
    }

    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxHandle> {
        let injected = self.record(SandboxOp::Create, &spec.name).err();
        let mut state = self.state();
        if let Some(error) = injected {
            if state.residue_on_create_failure && !state.containers.contains_key(&spec.name) {
                Self::insert(&mut state, spec);
            }
            return Err(error);
        }
        if state.containers.contains_key(&spec.name) {
            return Err(SandboxError::CommandFailed {
                binary: "mock".to_string(),
                op: "create",
                target: spec.name.clone(),
                status: "exit status: 125".to_string(),
                stderr: format!("Conflict. The container name \"{}\" is already in use", spec.name),
            });
        }
        let id = Self::insert(&mut state, spec);
        Ok(SandboxHandle {
            name: spec.name.clone(),
            id: Some(id),
        })
    }

    async fn start(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        self.record(SandboxOp::Start, handle.target())?;
        let mut state = self.state();
        let name = Self::find_name(&state, handle).ok_or_else(|| Self::missing(SandboxOp::Start, handle))?;
        let container = state
            .containers
            .get_mut(&name)
            .ok_or_else(|| Self::missing(SandboxOp::Start, handle))?;
        container.running = true;
        Ok(container.id.clone())
    }

    async fn stop(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.record(SandboxOp::Stop, handle.target())?;
        let mut state = self.state();
        let name = Self::find_name(&state, handle).ok_or_else(|| Self::missing(SandboxOp::Stop, handle))?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.record(SandboxOp::Remove, handle.target())?;
        let mut state = self.state();
        if let Some(name) = Self::find_name(&state, handle) {
            state.containers.remove(&name);
        }
        Ok(())
    }

    async fn wait(&self, handle: &SandboxHandle) -> SandboxResult<i64> {
        self.record(SandboxOp::Wait, handle.target())?;
        let delay = self.state().wait_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        let name = Self::find_name(&state, handle).ok_or_else(|| Self::missing(SandboxOp::Wait, handle))?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = false;
        }
        Ok(state.exit_code)
    }

    async fn logs(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        self.record(SandboxOp::Logs, handle.target())?;
        let state = self.state();
        Ok(state.log_lines.iter().map(|l| format!("{l}\n")).collect())
    }

    fn follow_logs(&self, handle: &SandboxHandle) -> LogStream {
        let recorded = self.record(SandboxOp::Logs, handle.target());
        let lines: Vec<SandboxResult<String>> = match recorded {
            Ok(()) => self
                .state()
                .log_lines
                .iter()
                .map(|l| Ok(format!("{l}\n")))
                .collect(),
            Err(e) => vec![Err(e)],
        };
        Box::pin(tokio_stream::iter(lines))
    }

    async fn open_interactive_shell(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.state().calls.push(format!("shell:{}", handle.target()));
        Ok(())
    }
}
