//! Shared implementation for OCI-compatible runtime CLIs.
//!
//! Docker and Podman accept the same verbs (`create`, `start`, `stop`, `rm`,
//! `wait`, `logs`, `exec`). They differ only in a few `create` flags, which
//! a [`Dialect`] supplies.

use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::sandbox::{LogStream, SandboxBackend, SandboxHandle, SandboxSpec};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

const STOP_TIMEOUT_SECS: &str = "10";

/// Runtime-specific flags.
pub trait Dialect: Send + Sync + 'static {
    const BINARY: &'static str;

    /// Flags appended to every `create`.
    fn create_flags() -> Vec<String> {
        Vec::new()
    }

    /// Options suffix for a bind mount (`ro`, SELinux labels...).
    fn bind_options(read_only: bool) -> Option<String> {
        read_only.then(|| "ro".to_string())
    }
}

/// Arguments for `<runtime> create`.
pub fn create_args<D: Dialect>(spec: &SandboxSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
    if spec.auto_remove {
        args.push("--rm".to_string());
    }
    args.extend(D::create_flags());
    args.push("--workdir".to_string());
    args.push(spec.workdir.clone());
    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.source.display(), mount.target);
        if let Some(options) = D::bind_options(mount.read_only) {
            volume.push(':');
            volume.push_str(&options);
        }
        args.push("--volume".to_string());
        args.push(volume);
    }
    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// A [`SandboxBackend`] driving an OCI runtime CLI.
pub struct OciBackend<D> {
    binary: String,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> OciBackend<D> {
    pub fn new() -> Self {
        Self::with_binary(D::BINARY)
    }

    /// Use a specific executable path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            _dialect: PhantomData,
        }
    }

    async fn output(&self, args: &[&str]) -> SandboxResult<Output> {
        debug!(binary = %self.binary, ?args, "Running container runtime");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SandboxError::RuntimeUnavailable {
                binary: self.binary.clone(),
                source,
            })
    }

    /// Run and require success, returning trimmed stdout.
    async fn run(&self, op: &'static str, target: &str, args: &[&str]) -> SandboxResult<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(self.failure(op, target, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn failure(&self, op: &'static str, target: &str, output: &Output) -> SandboxError {
        SandboxError::CommandFailed {
            binary: self.binary.clone(),
            op,
            target: target.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl<D: Dialect> Default for OciBackend<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_missing(stderr: &[u8]) -> bool {
    let stderr = String::from_utf8_lossy(stderr).to_lowercase();
    stderr.contains("no such container") || stderr.contains("no container with")
}

#[async_trait]
impl<D: Dialect> SandboxBackend for OciBackend<D> {
    fn name(&self) -> &'static str {
        D::BINARY
    }

    async fn is_available(&self) -> bool {
        matches!(self.output(&["version"]).await, Ok(out) if out.status.success())
    }

    async fn exists(&self, name: &str) -> SandboxResult<bool> {
        let output = self.output(&["container", "inspect", name]).await?;
        if output.status.success() {
            return Ok(true);
        }
        if is_missing(&output.stderr) {
            return Ok(false);
        }
        Err(self.failure("inspect", name, &output))
    }

    #[instrument(skip_all, fields(runtime = D::BINARY, name = %spec.name))]
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxHandle> {
        let args = create_args::<D>(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run("create", &spec.name, &args).await?;
        let id = id.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::UnexpectedOutput {
                op: "create",
                output: id,
            });
        }
        debug!(%id, "Sandbox created");
        Ok(SandboxHandle {
            name: spec.name.clone(),
            id: Some(id),
        })
    }

    async fn start(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        self.run("start", handle.target(), &["start", handle.target()]).await?;
        match &handle.id {
            Some(id) => Ok(id.clone()),
            None => {
                self.run(
                    "inspect",
                    &handle.name,
                    &["container", "inspect", "--format", "{{.Id}}", &handle.name],
                )
                .await
            }
        }
    }

    async fn stop(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        self.run(
            "stop",
            handle.target(),
            &["stop", "--time", STOP_TIMEOUT_SECS, handle.target()],
        )
        .await
        .map(drop)
    }

    async fn remove(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        let output = self.output(&["rm", "--force", handle.target()]).await?;
        if output.status.success() || is_missing(&output.stderr) {
            return Ok(());
        }
        Err(self.failure("rm", handle.target(), &output))
    }

    async fn wait(&self, handle: &SandboxHandle) -> SandboxResult<i64> {
        let out = self.run("wait", handle.target(), &["wait", handle.target()]).await?;
        let code = out.lines().last().unwrap_or_default().trim();
        code.parse().map_err(|_| SandboxError::UnexpectedOutput {
            op: "wait",
            output: out.clone(),
        })
    }

    async fn logs(&self, handle: &SandboxHandle) -> SandboxResult<String> {
        let output = self.output(&["logs", handle.target()]).await?;
        if !output.status.success() {
            return Err(self.failure("logs", handle.target(), &output));
        }
        // The runtime replays the container's stderr on its own stderr.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn follow_logs(&self, handle: &SandboxHandle) -> LogStream {
        let binary = self.binary.clone();
        let target = handle.target().to_string();
        Box::pin(async_stream::stream! {
            let mut child = match Command::new(&binary)
                .args(["logs", "--follow", &target])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => child,
                Err(source) => {
                    yield Err(SandboxError::RuntimeUnavailable { binary, source });
                    return;
                }
            };
            let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
                yield Err(SandboxError::UnexpectedOutput {
                    op: "logs",
                    output: "log pipes unavailable".to_string(),
                });
                return;
            };

            let mut lines = LinesStream::new(BufReader::new(stdout).lines())
                .merge(LinesStream::new(BufReader::new(stderr).lines()));
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => yield Ok(format!("{line}\n")),
                    Err(source) => {
                        yield Err(SandboxError::LogStream { target: target.clone(), source });
                        break;
                    }
                }
            }
            let _ = child.wait().await;
        })
    }

    async fn open_interactive_shell(&self, handle: &SandboxHandle) -> SandboxResult<()> {
        let status = Command::new(&self.binary)
            .args([
                "exec",
                "--interactive",
                "--tty",
                handle.target(),
                "sh",
                "-c",
                "command -v bash >/dev/null 2>&1 && exec bash || exec sh",
            ])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| SandboxError::RuntimeUnavailable {
                binary: self.binary.clone(),
                source,
            })?;
        debug!(%status, "Interactive shell exited");
        Ok(())
    }
}
