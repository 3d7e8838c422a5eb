//! Error types for sandbox backends.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// The runtime binary could not be launched.
    #[error("Container runtime '{binary}' is not available: {source}")]
    RuntimeUnavailable {
        binary: String,
        source: std::io::Error,
    },

    /// The runtime ran but reported failure. Carries its diagnostic output.
    #[error("{binary} {op} failed for '{target}' ({status}): {stderr}")]
    CommandFailed {
        binary: String,
        op: &'static str,
        target: String,
        status: String,
        stderr: String,
    },

    /// The runtime succeeded but printed something unexpected.
    #[error("Unexpected output from {op}: {output:?}")]
    UnexpectedOutput { op: &'static str, output: String },

    /// The execution descriptor could not be written.
    #[error("Failed to write sandbox descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize sandbox descriptor: {0}")]
    Serialize(String),

    /// Reading a log stream failed mid-way.
    #[error("Log stream for '{target}' failed: {source}")]
    LogStream {
        target: String,
        source: std::io::Error,
    },
}

pub type SandboxResult<T> = Result<T, SandboxError>;
