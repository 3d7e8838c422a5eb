//! `taskforge`: run AI coding agents on isolated tasks.
//!
//! Each task gets its own git worktree and container sandbox, runs a
//! declarative workflow, can be refined through iterations, and is finally
//! merged back into the branch it started from.

mod confirm;
mod logging;
mod output;
mod sandbox_exec;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use confirm::StdinConfirmer;
use output::{CommandError, Outcome, Printer};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tf_core::config::load_config;
use tf_core::init::{generate_project_structure, InitOptions};
use tf_core::merge::{FixedConfirmer, MergeConfirmer, MergeOutcome};
use tf_core::state::manager::CreateTaskRequest;
use tf_core::state::TaskManager;
use tf_protocol::task_models::{Task, TaskStatus};
use tokio_stream::StreamExt;

#[derive(Parser)]
#[command(name = "taskforge", version, about = "Orchestrate AI coding agents in sandboxed git worktrees")]
struct Cli {
    /// Print machine-readable JSON instead of formatted text.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root. Defaults to the current directory.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taskforge/` with a starter config and the default workflow.
    Init {
        /// Overwrite the starter files if `.taskforge/` exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Create a task and start it.
    Create {
        description: String,
        /// Use this title instead of asking the agent to expand the description.
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        workflow: Option<String>,
        /// Agent tool for the task's steps.
        #[arg(long)]
        agent: Option<String>,
        /// Workflow input as `name=value`. Repeatable.
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,
        /// Only record the task; start it later with `taskforge start`.
        #[arg(long)]
        no_start: bool,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Start a new or restarted task.
    Start {
        id: u64,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Refine a completed or failed task with further instructions.
    Iterate {
        id: u64,
        instructions: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Reset a new or failed task so it can be started again.
    Restart { id: u64 },
    /// Merge a completed task into the current branch.
    Merge {
        id: u64,
        /// Accept conflict resolutions without asking.
        #[arg(short, long)]
        yes: bool,
    },
    /// Push the branch a merged task was merged into.
    Push { id: u64 },
    /// Show a task and its iterations.
    Show { id: u64 },
    /// List all tasks.
    List,
    /// Print the sandbox output of a task.
    Logs {
        id: u64,
        #[arg(short, long)]
        follow: bool,
    },
    /// Open an interactive shell in a task's sandbox.
    Shell { id: u64 },
    /// Remove a task's sandbox.
    Rm { id: u64 },
    /// Run a workflow inside a sandbox. Invoked by the sandbox entrypoint.
    #[command(hide = true)]
    SandboxExec {
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(clap::Args, Clone, Copy)]
struct WaitArgs {
    /// Block until the sandbox exits.
    #[arg(long)]
    wait: bool,
    /// Stop the sandbox after this many seconds (with `--wait`).
    #[arg(long, requires = "wait")]
    timeout: Option<u64>,
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }

    let printer = Printer::new(cli.json);
    match run(cli, &printer).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Warning) => ExitCode::from(1),
        Err(error) => {
            printer.error(&error);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, printer: &Printer) -> Result<Outcome, CommandError> {
    let repo = match cli.repo {
        Some(repo) => repo,
        None => std::env::current_dir().wrap_err("cannot determine the current directory")?,
    };

    match cli.command {
        Command::Init { force } => {
            let written = generate_project_structure(InitOptions {
                target_dir: repo,
                force,
            })
            .await
            .wrap_err("init failed")?;
            printer.initialized(&written);
            Ok(Outcome::Success)
        }
        Command::SandboxExec { dir } => {
            let report = sandbox_exec::run(&dir).await?;
            Ok(if report.success {
                Outcome::Success
            } else {
                Outcome::Warning
            })
        }
        command => {
            let manager = open_manager(&repo).await?;
            dispatch(&manager, command, printer).await
        }
    }
}

async fn open_manager(repo: &Path) -> Result<TaskManager, CommandError> {
    let config = load_config(repo)
        .await
        .wrap_err_with(|| format!("cannot load configuration in {}", repo.display()))?;
    Ok(TaskManager::from_config(repo, config))
}

async fn dispatch(
    manager: &TaskManager,
    command: Command,
    printer: &Printer,
) -> Result<Outcome, CommandError> {
    match command {
        Command::Create {
            description,
            title,
            workflow,
            agent,
            inputs,
            no_start,
            wait,
        } => {
            let mut request = CreateTaskRequest::new(description);
            request.title = title;
            request.workflow = workflow;
            request.agent = agent;
            request.inputs = inputs.into_iter().collect();

            let task = manager
                .create_task(request)
                .await
                .map_err(|e| CommandError::task("create", None, e))?;
            if no_start {
                printer.task(&task);
                return Ok(Outcome::Success);
            }
            start_and_report(manager, task.id, wait, printer).await
        }
        Command::Start { id, wait } => start_and_report(manager, id, wait, printer).await,
        Command::Iterate {
            id,
            instructions,
            wait,
        } => {
            let task = manager
                .iterate_task(id, &instructions)
                .await
                .map_err(|e| CommandError::task("iterate", Some(id), e))?;
            finish_run(manager, task, wait, printer).await
        }
        Command::Restart { id } => {
            let task = manager
                .restart_task(id)
                .await
                .map_err(|e| CommandError::task("restart", Some(id), e))?;
            printer.task(&task);
            Ok(Outcome::Success)
        }
        Command::Merge { id, yes } => {
            let confirmer: Box<dyn MergeConfirmer> = if yes {
                Box::new(FixedConfirmer(true))
            } else {
                Box::new(StdinConfirmer)
            };
            let outcome = manager
                .merge_task(id, confirmer.as_ref())
                .await
                .map_err(|e| CommandError::task("merge", Some(id), e))?;
            printer.merge(id, &outcome);
            Ok(match outcome {
                MergeOutcome::Merged { .. } => Outcome::Success,
                MergeOutcome::Declined { .. } => Outcome::Warning,
            })
        }
        Command::Push { id } => {
            let branch = manager
                .push_task(id)
                .await
                .map_err(|e| CommandError::task("push", Some(id), e))?;
            printer.pushed(id, &branch);
            Ok(Outcome::Success)
        }
        Command::Show { id } => {
            let details = manager
                .show_task(id)
                .map_err(|e| CommandError::task("show", Some(id), e))?;
            printer.details(&details);
            Ok(Outcome::Success)
        }
        Command::List => {
            let tasks = manager
                .list_tasks()
                .map_err(|e| CommandError::task("list", None, e))?;
            printer.tasks(&tasks);
            Ok(Outcome::Success)
        }
        Command::Logs { id, follow } => {
            let error = |e| CommandError::task("logs", Some(id), e);
            if follow {
                let mut stream = manager.follow_task_logs(id).map_err(error)?;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| eyre!(e).wrap_err("log stream failed"))?;
                    printer.log_chunk(&chunk);
                }
            } else {
                let logs = manager.task_logs(id).await.map_err(error)?;
                printer.log_chunk(&logs);
            }
            Ok(Outcome::Success)
        }
        Command::Shell { id } => {
            manager
                .open_shell(id)
                .await
                .map_err(|e| CommandError::task("shell", Some(id), e))?;
            Ok(Outcome::Success)
        }
        Command::Rm { id } => {
            let task = manager
                .remove_sandbox(id)
                .await
                .map_err(|e| CommandError::task("rm", Some(id), e))?;
            printer.task(&task);
            Ok(Outcome::Success)
        }
        Command::Init { .. } | Command::SandboxExec { .. } => {
            Err(eyre!("command does not need a task manager").into())
        }
    }
}

async fn start_and_report(
    manager: &TaskManager,
    id: u64,
    wait: WaitArgs,
    printer: &Printer,
) -> Result<Outcome, CommandError> {
    let task = manager
        .start_task(id)
        .await
        .map_err(|e| CommandError::task("start", Some(id), e))?;
    finish_run(manager, task, wait, printer).await
}

async fn finish_run(
    manager: &TaskManager,
    task: Task,
    wait: WaitArgs,
    printer: &Printer,
) -> Result<Outcome, CommandError> {
    if !wait.wait {
        printer.task(&task);
        return Ok(Outcome::Success);
    }
    let timeout = wait.timeout.map(Duration::from_secs);
    let task = manager
        .wait_for_task(task.id, timeout)
        .await
        .map_err(|e| CommandError::task("wait", Some(task.id), e))?;
    printer.task(&task);
    Ok(if task.status == TaskStatus::Failed {
        Outcome::Warning
    } else {
        Outcome::Success
    })
}
