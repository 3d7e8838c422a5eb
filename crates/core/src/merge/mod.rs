//! Reconciles task branches into the target branch.

pub mod conductor;
pub mod error;

pub use conductor::{FixedConfirmer, MergeConductor, MergeConfirmer, MergeOutcome};
pub use error::{MergeError, MergeResult};
