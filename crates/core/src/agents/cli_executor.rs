//! Subprocess executor for CLI-based agents.
//!
//! Spawns an agent CLI and parses its stdout as JSON Lines.

use crate::agents::base::AgentError;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::Stream;
use tracing::debug;

/// Stream of parsed JSON values, one per non-empty stdout line.
pub type JsonLineStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, AgentError>> + Send>>;

/// CLI executor for agent adapters.
pub struct CliExecutor;

impl CliExecutor {
    /// Execute a CLI command and parse its stdout as JSON Lines.
    ///
    /// Empty lines are skipped. Lines that fail to parse yield
    /// `AgentError::StreamParseError` without ending the stream. A non-zero
    /// exit status yields a final `AgentError::ExecutionError` carrying the
    /// tail of stderr.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tf_core::agents::cli_executor::CliExecutor;
    /// use tokio_stream::StreamExt;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let stream = CliExecutor::execute(
    ///         "echo".to_string(),
    ///         vec![r#"{"type":"test"}"#.to_string()],
    ///         ".".into(),
    ///     );
    ///
    ///     let values: Vec<_> = stream.collect().await;
    ///     println!("Got {} values", values.len());
    /// }
    /// ```
    pub fn execute(command: String, args: Vec<String>, working_dir: PathBuf) -> JsonLineStream {
        let stream = async_stream::stream! {
            debug!(%command, dir = %working_dir.display(), "Spawning agent CLI");
            let mut cmd = Command::new(&command);
            cmd.args(&args);
            cmd.current_dir(&working_dir);
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    yield Err(AgentError::ExecutionError(format!(
                        "Failed to spawn command '{command}': {e}"
                    )));
                    return;
                }
            };

            let stdout = match child.stdout.take() {
                Some(stdout) => stdout,
                None => {
                    yield Err(AgentError::ExecutionError(
                        "Failed to capture stdout".to_string()
                    ));
                    return;
                }
            };

            // Drain stderr concurrently so a chatty CLI never blocks on a full pipe.
            let stderr_task = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    let mut buf = String::new();
                    let _ = stderr.read_to_string(&mut buf).await;
                    buf
                })
            });

            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(value) => yield Ok(value),
                    Err(e) => {
                        yield Err(AgentError::StreamParseError(format!(
                            "Failed to parse JSON: {e} (line: {line})"
                        )));
                    }
                }
            }

            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    yield Err(AgentError::ExecutionError(format!(
                        "'{command}' exited with {status}: {}",
                        tail(&stderr, 20)
                    )));
                }
                Err(e) => {
                    yield Err(AgentError::ExecutionError(format!(
                        "Failed to wait for '{command}': {e}"
                    )));
                }
            }
        };

        Box::pin(stream)
    }
}

/// Last `n` lines of `text`.
pub(crate) fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
