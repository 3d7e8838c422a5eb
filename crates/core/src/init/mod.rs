//! Initialization of a `.taskforge/` project directory.
//!
//! # Example
//!
//! ```no_run
//! use tf_core::init::{generate_project_structure, InitOptions};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = InitOptions {
//!     target_dir: PathBuf::from("."),
//!     force: false,
//! };
//!
//! generate_project_structure(options).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod generator;
pub mod templates;

pub use error::{InitError, InitResult};
pub use generator::{generate_project_structure, InitOptions};
pub use templates::{get_template, list_templates};
