//! Sandboxed execution environments.
//!
//! A [`SandboxBackend`] drives one container runtime through its CLI. The
//! [`SandboxManager`] builds the execution descriptor and container spec
//! for a task iteration and owns the create/cleanup protocol; it only ever
//! talks to the trait, so the runtime is chosen by configuration through
//! [`backend_for`].

pub mod descriptor;
pub mod docker;
pub mod error;
pub mod manager;
pub mod mock;
pub mod oci;
pub mod podman;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tf_protocol::config_models::BackendKind;
use tokio_stream::Stream;

pub use descriptor::ExecutionDescriptor;
pub use docker::DockerBackend;
pub use error::{SandboxError, SandboxResult};
pub use manager::{SandboxManager, SandboxRequest};
pub use mock::{MockBackend, SandboxOp};
pub use podman::PodmanBackend;

/// Infinite stream of log chunks. Dropping it cancels the follower only.
pub type LogStream = Pin<Box<dyn Stream<Item = SandboxResult<String>> + Send>>;

/// A bind mount from the host into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything a backend needs to create one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub workdir: String,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub auto_remove: bool,
}

/// Reference to a created sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub name: String,
    /// Runtime-assigned id, when known.
    pub id: Option<String>,
}

impl SandboxHandle {
    /// Handle addressing a sandbox by name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    /// Identifier passed to the runtime: the id if known, else the name.
    pub fn target(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Lifecycle primitives every container runtime backend provides.
///
/// Each operation is independently retryable. `remove` of a sandbox that no
/// longer exists succeeds.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    async fn exists(&self, name: &str) -> SandboxResult<bool>;

    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxHandle>;

    /// Start the sandbox and return its id.
    async fn start(&self, handle: &SandboxHandle) -> SandboxResult<String>;

    async fn stop(&self, handle: &SandboxHandle) -> SandboxResult<()>;

    async fn remove(&self, handle: &SandboxHandle) -> SandboxResult<()>;

    /// Block until the sandbox exits and return its exit code.
    async fn wait(&self, handle: &SandboxHandle) -> SandboxResult<i64>;

    async fn logs(&self, handle: &SandboxHandle) -> SandboxResult<String>;

    fn follow_logs(&self, handle: &SandboxHandle) -> LogStream;

    /// Attach an interactive shell to the caller's terminal.
    async fn open_interactive_shell(&self, handle: &SandboxHandle) -> SandboxResult<()>;
}

/// Select the backend for a configured runtime.
pub fn backend_for(kind: BackendKind) -> Arc<dyn SandboxBackend> {
    match kind {
        BackendKind::Docker => Arc::new(DockerBackend::new()),
        BackendKind::Podman => Arc::new(PodmanBackend::new()),
    }
}
