//! Configuration file loader for the `.taskforge/` directory.
//!
//! This module loads and validates:
//! - `config.toml`: Global settings
//! - `workflows/*.yaml` and `workflows/*.yml`: Workflow definitions

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::models::{AppConfig, WorkflowLibrary};
use crate::config::{CONFIG_FILE, PROJECT_DIR, WORKFLOWS_DIR};
use crate::workflow::validation::validate_workflow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tf_protocol::config_models::GlobalConfig;
use tf_protocol::workflow_models::Workflow;
use tracing::debug;
use walkdir::WalkDir;

/// Loads all configuration from the `.taskforge/` directory under `root`.
///
/// A missing directory or missing files yield defaults. The built-in
/// `default` workflow is always present unless a workflow file of the same
/// name replaces it.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - Files exist but cannot be read
/// - Files have invalid TOML or YAML syntax
/// - A workflow definition fails validation
/// - Two workflow files declare the same name
///
/// # Example
///
/// ```rust,no_run
/// use tf_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} workflows", config.workflows.len());
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let project_dir = root.join(PROJECT_DIR);

    if !project_dir.exists() {
        debug!(path = %project_dir.display(), "No project directory, using defaults");
        return AppConfig::with_builtins();
    }

    let global = load_global_config(&project_dir)?;
    let workflows = load_workflows(&project_dir)?;

    Ok(AppConfig { global, workflows })
}

/// Loads global configuration from `config.toml`.
fn load_global_config(project_dir: &Path) -> ConfigResult<GlobalConfig> {
    let config_path = project_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        return Ok(GlobalConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path,
        source,
    })
}

/// Loads the built-in workflows and every definition in `workflows/`.
fn load_workflows(project_dir: &Path) -> ConfigResult<WorkflowLibrary> {
    let mut library = WorkflowLibrary::with_builtins()?;
    let workflows_dir = project_dir.join(WORKFLOWS_DIR);

    if !workflows_dir.exists() {
        return Ok(library);
    }

    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for entry in WalkDir::new(&workflows_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: workflows_dir.clone(),
            source,
        })?;

        let path = entry.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext != Some("yaml") && ext != Some("yml") {
            continue;
        }

        let workflow = load_workflow(path)?;
        if let Some(first) = seen.insert(workflow.name.clone(), path.to_path_buf()) {
            return Err(ConfigError::InvalidConfig {
                path: path.to_path_buf(),
                reason: format!(
                    "workflow '{}' is already defined in {}",
                    workflow.name,
                    first.display()
                ),
            });
        }
        debug!(name = %workflow.name, path = %path.display(), "Loaded workflow");
        library.insert(workflow);
    }

    Ok(library)
}

/// Parses and validates one workflow file.
pub fn load_workflow(path: &Path) -> ConfigResult<Workflow> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let workflow = Workflow::from_yaml(&content).map_err(|source| ConfigError::YamlParse {
        path: path.to_path_buf(),
        source,
    })?;

    let issues = validate_workflow(&workflow);
    if !issues.is_empty() {
        let reason = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason,
        });
    }

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tf_protocol::config_models::BackendKind;

    /// RED: This test defines our acceptance criteria.
    ///
    /// We create a complete `.taskforge/` structure and verify that
    /// `load_config` parses settings and workflows.
    #[tokio::test]
    async fn test_load_config_acceptance() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        let project_dir = root.join(".taskforge");

        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");

        let config_toml = r#"
default_workflow = "review"

[sandbox]
backend = "podman"
image = "ghcr.io/acme/agent:1"
extra_credentials = ["~/.config/gh/hosts.yml"]

[sandbox.env]
HTTP_PROXY = "http://proxy:3128"

[agent]
tool = "claude"
model = "sonnet"

[merge]
attribution = true
"#;
        fs::write(project_dir.join("config.toml"), config_toml)
            .expect("Failed to write config.toml");

        let workflow_yaml = r#"name: review
description: Review the change
inputs:
  - name: description
    required: true
steps:
  - id: review
    prompt: "Review: {{inputs.description}}"
    outputs:
      - name: notes
  - id: fix
    prompt: "Address: {{steps.review.outputs.notes}}"
config:
  timeout: 600
  continueOnError: true
"#;
        fs::write(project_dir.join("workflows/review.yaml"), workflow_yaml)
            .expect("Failed to write workflow file");

        let config = load_config(root).await.expect("Failed to load config");

        assert_eq!(config.global.sandbox.backend, BackendKind::Podman);
        assert_eq!(config.global.sandbox.image, "ghcr.io/acme/agent:1");
        assert_eq!(
            config.global.sandbox.env.get("HTTP_PROXY").map(String::as_str),
            Some("http://proxy:3128")
        );
        assert_eq!(config.global.sandbox.workspace_mount, "/workspace");
        assert_eq!(config.global.agent.model.as_deref(), Some("sonnet"));
        assert!(config.global.merge.attribution);

        assert_eq!(config.workflows.names(), vec!["default", "review"]);
        let review = config.default_workflow().expect("review should be the default");
        assert_eq!(review.steps.len(), 2);
        assert_eq!(review.config.timeout, Some(600));
        assert!(review.config.continue_on_error);
    }

    /// RED: Loading without a `.taskforge/` folder yields defaults.
    #[tokio::test]
    async fn test_load_config_empty_directory() {
        let dir = tempdir().expect("Failed to create temp dir");

        let config = load_config(dir.path())
            .await
            .expect("Should handle missing .taskforge");

        assert_eq!(config.global, GlobalConfig::default());
        assert_eq!(config.workflows.names(), vec!["default"]);
        let default = config.default_workflow().expect("built-in default");
        assert!(validate_workflow(default).is_empty());
    }

    /// RED: Only config.toml exists.
    #[tokio::test]
    async fn test_load_config_partial() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(&project_dir).expect("Failed to create .taskforge");
        fs::write(project_dir.join("config.toml"), "[agent]\ntool = \"mock\"\n")
            .expect("Failed to write config.toml");

        let config = load_config(dir.path())
            .await
            .expect("Should handle partial config");

        assert_eq!(config.global.agent.tool, "mock");
        assert_eq!(config.global.default_workflow, "default");
        assert_eq!(config.workflows.len(), 1);
    }

    /// REFACTOR: Invalid TOML syntax names the file.
    #[tokio::test]
    async fn test_load_config_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(&project_dir).expect("Failed to create .taskforge");
        fs::write(project_dir.join("config.toml"), "backend = [invalid toml")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::TomlParse { path, .. }) = result {
            assert!(path.ends_with("config.toml"));
        } else {
            panic!("Expected TomlParse error");
        }
    }

    /// REFACTOR: Invalid YAML in a workflow file names the file.
    #[tokio::test]
    async fn test_load_config_invalid_yaml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");
        fs::write(
            project_dir.join("workflows/test.yaml"),
            "name: test\n  invalid: [yaml",
        )
        .expect("Failed to write workflow file");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::YamlParse { path, .. }) = result {
            assert!(path.ends_with("test.yaml"));
        } else {
            panic!("Expected YamlParse error");
        }
    }

    /// REFACTOR: A forward reference is rejected at load time.
    #[tokio::test]
    async fn test_load_config_rejects_forward_reference() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");
        let workflow_yaml = r#"name: broken
steps:
  - id: a
    prompt: "{{steps.b.outputs.x}}"
  - id: b
    prompt: "done"
    outputs:
      - name: x
"#;
        fs::write(project_dir.join("workflows/broken.yaml"), workflow_yaml)
            .expect("Failed to write workflow file");

        let result = load_config(dir.path()).await;

        match result {
            Err(ConfigError::InvalidConfig { path, reason }) => {
                assert!(path.ends_with("broken.yaml"));
                assert!(reason.contains("'b'"), "reason was: {reason}");
            }
            other => panic!("Expected InvalidConfig error, got {other:?}"),
        }
    }

    /// REFACTOR: Two files may not define the same workflow.
    #[tokio::test]
    async fn test_load_config_duplicate_workflow_names() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");
        let workflow_yaml = "name: same\nsteps:\n  - id: a\n    prompt: go\n";
        fs::write(project_dir.join("workflows/a.yaml"), workflow_yaml).expect("write a");
        fs::write(project_dir.join("workflows/b.yml"), workflow_yaml).expect("write b");

        let result = load_config(dir.path()).await;

        assert!(matches!(result, Err(ConfigError::InvalidConfig { .. })));
    }

    /// REFACTOR: Non-matching files are ignored and `.yml` is accepted.
    #[tokio::test]
    async fn test_load_config_extensions() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");
        fs::write(project_dir.join("workflows/notes.txt"), "Not a yaml file")
            .expect("Failed to write txt file");
        fs::write(
            project_dir.join("workflows/quick.yml"),
            "name: quick\nsteps:\n  - id: only\n    prompt: go\n",
        )
        .expect("Failed to write workflow file");

        let config = load_config(dir.path()).await.expect("Should load .yml files");

        assert_eq!(config.workflows.names(), vec!["default", "quick"]);
    }

    /// REFACTOR: A project file named `default` replaces the built-in.
    #[tokio::test]
    async fn test_project_default_workflow_overrides_builtin() {
        let dir = tempdir().expect("Failed to create temp dir");
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("workflows")).expect("Failed to create workflows dir");
        fs::write(
            project_dir.join("workflows/default.yaml"),
            "name: default\nsteps:\n  - id: only\n    prompt: go\n",
        )
        .expect("Failed to write workflow file");

        let config = load_config(dir.path()).await.expect("Should load");

        let default = config.default_workflow().expect("default exists");
        assert_eq!(default.steps.len(), 1);
    }

    #[test]
    fn test_unknown_workflow_lists_available() {
        let config = AppConfig::with_builtins().expect("builtins parse");
        let err = config.workflows.require("nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown workflow 'nope' (available: default)"
        );
    }
}
