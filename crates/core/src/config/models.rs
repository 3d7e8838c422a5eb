//! Configuration models that aggregate all settings.
//!
//! This module provides the unified `AppConfig` structure that combines
//! global settings and the workflow library into a single configuration
//! object.

use crate::config::error::{ConfigError, ConfigResult};
use crate::init::templates::DEFAULT_WORKFLOW;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tf_protocol::config_models::GlobalConfig;
use tf_protocol::workflow_models::Workflow;

/// Unified application configuration loaded from `.taskforge/`.
///
/// # Example
///
/// ```rust,no_run
/// use tf_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Sandbox backend: {:?}", config.global.sandbox.backend);
/// println!("Workflows: {:?}", config.workflows.names());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Global settings from `config.toml`.
    pub global: GlobalConfig,

    /// Built-in workflows plus those loaded from `workflows/*.yaml`.
    pub workflows: WorkflowLibrary,
}

impl AppConfig {
    /// Defaults with only the built-in workflows.
    pub fn with_builtins() -> ConfigResult<Self> {
        Ok(Self {
            global: GlobalConfig::default(),
            workflows: WorkflowLibrary::with_builtins()?,
        })
    }

    /// The workflow a task runs when it does not name one.
    pub fn default_workflow(&self) -> ConfigResult<&Workflow> {
        self.workflows.require(&self.global.default_workflow)
    }
}

/// Workflow definitions keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowLibrary {
    workflows: BTreeMap<String, Workflow>,
}

impl WorkflowLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library holding the built-in `default` workflow.
    pub fn with_builtins() -> ConfigResult<Self> {
        let workflow =
            Workflow::from_yaml(DEFAULT_WORKFLOW).map_err(|source| ConfigError::YamlParse {
                path: PathBuf::from("<builtin>/default.yaml"),
                source,
            })?;
        let mut library = Self::new();
        library.insert(workflow);
        Ok(library)
    }

    /// Add a workflow, replacing any existing one with the same name.
    pub fn insert(&mut self, workflow: Workflow) -> Option<Workflow> {
        self.workflows.insert(workflow.name.clone(), workflow)
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    /// Like [`get`](Self::get), but a missing workflow is an error listing
    /// the known names.
    pub fn require(&self, name: &str) -> ConfigResult<&Workflow> {
        self.get(name).ok_or_else(|| ConfigError::UnknownWorkflow {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }
}
