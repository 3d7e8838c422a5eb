//! Interactive operator gate for merges.

use async_trait::async_trait;
use colored::Colorize;
use tf_core::merge::MergeConfirmer;
use tf_protocol::task_models::Task;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Asks on stderr and reads the answer from stdin. Anything other than
/// `y`/`yes` declines, including end of input.
pub struct StdinConfirmer;

#[async_trait]
impl MergeConfirmer for StdinConfirmer {
    async fn confirm(&self, task: &Task, resolved_files: &[String]) -> bool {
        eprintln!(
            "{} Merging task #{} resolved conflicts in:",
            "?".yellow().bold(),
            task.id
        );
        for file in resolved_files {
            eprintln!("  {file}");
        }
        eprint!("Review the resolutions and commit the merge? [y/N] ");

        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read confirmation, declining");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
