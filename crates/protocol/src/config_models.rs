//! Global configuration models for `.taskforge/config.toml`.
//!
//! This module defines the structure of the project-wide configuration file
//! that selects the sandbox backend, the agent tool and merge behaviour.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Container runtime used to run sandboxes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    Podman,
}

impl BackendKind {
    /// Name of the runtime executable.
    pub fn binary(self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Podman => "podman",
        }
    }
}

/// Sandbox settings (`[sandbox]`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: BackendKind,

    /// Image containing the agent tools and the `taskforge` binary.
    pub image: String,

    /// Remove the sandbox once its task finishes.
    pub auto_remove: bool,

    /// Mount point of the isolated working copy inside the sandbox.
    pub workspace_mount: String,

    /// Mount point of the iteration output directory inside the sandbox.
    pub output_mount: String,

    /// Environment overrides. These win over agent defaults.
    pub env: BTreeMap<String, String>,

    /// Extra host files bound read-only at the same path under the agent home.
    pub extra_credentials: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Docker,
            image: "taskforge/agent:latest".to_string(),
            auto_remove: false,
            workspace_mount: "/workspace".to_string(),
            output_mount: "/taskforge/output".to_string(),
            env: BTreeMap::new(),
            extra_credentials: Vec::new(),
        }
    }
}

/// Agent settings (`[agent]`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent tool used for tasks and for host-side assistance.
    pub tool: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Ask the agent to expand raw descriptions into a title and description.
    pub expand_tasks: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tool: "claude".to_string(),
            model: None,
            expand_tasks: true,
        }
    }
}

/// Merge settings (`[merge]`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Append `attribution_trailer` to generated commit messages.
    pub attribution: bool,

    pub attribution_trailer: String,

    /// Remove the isolated working copy and task branch after a merge.
    pub remove_worktree: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            attribution: false,
            attribution_trailer: "Co-authored-by: taskforge agent <agent@taskforge.invalid>"
                .to_string(),
            remove_worktree: false,
        }
    }
}

/// Represents global settings from `.taskforge/config.toml`.
///
/// # Example
///
/// ```toml
/// default_workflow = "default"
///
/// [sandbox]
/// backend = "podman"
/// image = "ghcr.io/acme/agent:1"
///
/// [sandbox.env]
/// HTTP_PROXY = "http://proxy:3128"
///
/// [merge]
/// attribution = true
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Workflow used when a task does not name one.
    pub default_workflow: String,

    /// Directory holding isolated working copies, relative to the repository.
    pub worktree_dir: String,

    pub sandbox: SandboxConfig,

    pub agent: AgentConfig,

    pub merge: MergeConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_workflow: "default".to_string(),
            worktree_dir: ".taskforge/worktrees".to_string(),
            sandbox: SandboxConfig::default(),
            agent: AgentConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}
