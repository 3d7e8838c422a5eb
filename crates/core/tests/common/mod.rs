//! Shared fixtures for task lifecycle tests.
//!
//! - A project harness wiring a [`TaskManager`] to in-memory collaborators
//! - A fake git repository with scriptable conflicts
//! - A scripted assistant and a recording merge confirmer

pub mod fakes;
pub mod fixtures;

#[allow(unused_imports)]
pub use fakes::*;
#[allow(unused_imports)]
pub use fixtures::*;
