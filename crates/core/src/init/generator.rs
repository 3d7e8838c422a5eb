//! Directory structure and file generation for `.taskforge/` initialization.

use super::error::{InitError, InitResult};
use super::templates::{get_template, list_templates};
use crate::config::PROJECT_DIR;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Options for initializing a `.taskforge/` directory.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Repository root where `.taskforge/` will be created.
    pub target_dir: PathBuf,

    /// Overwrite the starter files if `.taskforge/` already exists.
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            target_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            force: false,
        }
    }
}

/// Generate the starter `.taskforge/` directory.
///
/// ```text
/// .taskforge/
/// ├── .gitignore
/// ├── config.toml
/// └── workflows/
///     └── default.yaml
/// ```
///
/// With `force`, existing starter files are overwritten; task records and
/// any other files are left alone.
///
/// Returns the paths written.
pub async fn generate_project_structure(options: InitOptions) -> InitResult<Vec<PathBuf>> {
    let project_dir = options.target_dir.join(PROJECT_DIR);

    if project_dir.exists() && !options.force {
        return Err(InitError::DirectoryExists(project_dir));
    }

    let mut written = Vec::new();
    for template in list_templates("") {
        written.push(write_template_file(&project_dir, template)?);
    }

    info!(path = %project_dir.display(), files = written.len(), "Initialized project");
    Ok(written)
}

fn write_template_file(project_dir: &Path, template_path: &str) -> InitResult<PathBuf> {
    let content = get_template(template_path)
        .ok_or_else(|| InitError::TemplateNotFound(template_path.to_string()))?;

    let target_path = project_dir.join(template_path);

    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|source| InitError::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(&target_path, content).map_err(|source| InitError::FileWrite {
        path: target_path.clone(),
        source,
    })?;

    Ok(target_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_config;
    use tempfile::tempdir;

    /// RED: The generated structure loads as a valid configuration.
    #[tokio::test]
    async fn test_generate_structure_success() {
        let dir = tempdir().unwrap();
        let options = InitOptions {
            target_dir: dir.path().to_path_buf(),
            force: false,
        };

        let written = generate_project_structure(options).await.unwrap();
        assert_eq!(written.len(), 3);

        let project_dir = dir.path().join(".taskforge");
        assert!(project_dir.join("config.toml").exists());
        assert!(project_dir.join("workflows/default.yaml").exists());
        assert!(project_dir.join(".gitignore").exists());

        let config = load_config(dir.path()).await.unwrap();
        assert_eq!(config.workflows.names(), vec!["default"]);
        assert_eq!(config.global.agent.tool, "claude");
    }

    /// Existing directory without force flag returns an error.
    #[tokio::test]
    async fn test_generate_structure_exists_no_force() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".taskforge")).unwrap();

        let result = generate_project_structure(InitOptions {
            target_dir: dir.path().to_path_buf(),
            force: false,
        })
        .await;

        assert!(matches!(result, Err(InitError::DirectoryExists(_))));
    }

    /// Force rewrites starter files and keeps task state.
    #[tokio::test]
    async fn test_generate_structure_force_keeps_tasks() {
        let dir = tempdir().unwrap();
        let project_dir = dir.path().join(".taskforge");
        fs::create_dir_all(project_dir.join("tasks/1")).unwrap();
        fs::write(project_dir.join("tasks/1/task.json"), "{}").unwrap();
        fs::write(project_dir.join("config.toml"), "broken = [").unwrap();

        generate_project_structure(InitOptions {
            target_dir: dir.path().to_path_buf(),
            force: true,
        })
        .await
        .unwrap();

        let config = fs::read_to_string(project_dir.join("config.toml")).unwrap();
        assert!(config.contains("[sandbox]"));
        assert!(project_dir.join("tasks/1/task.json").exists());
    }

    #[test]
    fn test_default_init_options() {
        let options = InitOptions::default();
        assert!(!options.force);
    }
}
