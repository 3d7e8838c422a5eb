//! Configuration loading and management.
//!
//! This module loads the project configuration from the `.taskforge/`
//! directory: global settings and the workflow library.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::{AppConfig, WorkflowLibrary};

/// Project directory at the repository root.
pub const PROJECT_DIR: &str = ".taskforge";

/// Global settings file inside [`PROJECT_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Workflow definitions directory inside [`PROJECT_DIR`].
pub const WORKFLOWS_DIR: &str = "workflows";
