//! Starter files for `.taskforge/` initialization.
//!
//! Templates live in the crate's `templates/` directory and are compiled
//! into the binary, so `taskforge init` needs no files at runtime.

/// Starter `config.toml`.
pub const CONFIG_TOML: &str = include_str!("../../templates/config.toml");

/// The built-in `default` workflow (plan, implement, summarize).
pub const DEFAULT_WORKFLOW: &str = include_str!("../../templates/workflows/default.yaml");

/// Keeps runtime state out of version control.
pub const GITIGNORE: &str = "tasks/\nworktrees/\n";

/// Every template, keyed by its path relative to `.taskforge/`.
const TEMPLATES: &[(&str, &str)] = &[
    ("config.toml", CONFIG_TOML),
    ("workflows/default.yaml", DEFAULT_WORKFLOW),
    (".gitignore", GITIGNORE),
];

/// Get template file content by path.
///
/// # Example
/// ```
/// use tf_core::init::templates::get_template;
///
/// let config = get_template("config.toml").expect("config.toml should exist");
/// assert!(config.contains("[sandbox]"));
/// ```
pub fn get_template(path: &str) -> Option<&'static str> {
    TEMPLATES
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, content)| *content)
}

/// List all template paths that start with `prefix`.
pub fn list_templates(prefix: &str) -> Vec<&'static str> {
    TEMPLATES
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| name.starts_with(prefix))
        .collect()
}
