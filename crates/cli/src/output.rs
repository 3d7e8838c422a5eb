//! Human and JSON rendering of command results.

use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tf_core::merge::MergeOutcome;
use tf_core::state::manager::TaskDetails;
use tf_core::TaskError;
use tf_protocol::task_models::{Task, TaskStatus};

/// How a command ended, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Completed without error but not as asked, e.g. a declined merge.
    Warning,
}

pub enum CommandError {
    /// A task operation failed.
    Task {
        op: &'static str,
        task_id: Option<u64>,
        source: TaskError,
    },
    Other(color_eyre::Report),
}

impl CommandError {
    pub fn task(op: &'static str, task_id: Option<u64>, source: TaskError) -> Self {
        Self::Task {
            op,
            task_id,
            source,
        }
    }
}

impl From<color_eyre::Report> for CommandError {
    fn from(report: color_eyre::Report) -> Self {
        Self::Other(report)
    }
}

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn initialized(&self, written: &[PathBuf]) {
        if self.json {
            self.emit(&json!({ "written": written }));
            return;
        }
        println!("{} Initialized .taskforge/", "✓".green());
        for path in written {
            println!("  {}", path.display());
        }
    }

    pub fn task(&self, task: &Task) {
        if self.json {
            self.emit(task);
            return;
        }
        println!(
            "{} {} {}",
            format!("#{}", task.id).bold(),
            status_label(task.status),
            task.title
        );
        println!("  branch     {}", task.branch_name);
        println!("  worktree   {}", task.worktree_path);
        println!("  iterations {}", task.iterations);
        if let Some(container) = &task.container_id {
            println!("  sandbox    {container} ({:?})", task.execution_status);
        }
    }

    pub fn tasks(&self, tasks: &[Task]) {
        if self.json {
            self.emit(&tasks);
            return;
        }
        if tasks.is_empty() {
            println!("No tasks yet. Create one with `taskforge create \"...\"`.");
            return;
        }
        for task in tasks {
            println!(
                "{:>5}  {:<12}  {:>3}  {}",
                format!("#{}", task.id).bold(),
                status_label(task.status),
                task.iterations,
                task.title
            );
        }
    }

    pub fn details(&self, details: &TaskDetails) {
        if self.json {
            self.emit(details);
            return;
        }
        self.task(&details.task);
        if !details.task.description.is_empty() {
            println!();
            println!("{}", details.task.description);
        }
        println!();
        for item in &details.iterations {
            let state = item
                .status
                .as_ref()
                .map(|s| format!("{:?} {}%", s.status, s.progress))
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  {} {} [{}]",
                format!("iteration {}", item.iteration.iteration).cyan(),
                item.iteration.title,
                state.dimmed()
            );
            if let Some(error) = item.status.as_ref().and_then(|s| s.error.as_ref()) {
                println!("    {}", error.red());
            }
        }
    }

    pub fn merge(&self, task_id: u64, outcome: &MergeOutcome) {
        if self.json {
            self.emit(&json!({ "taskId": task_id, "result": outcome }));
            return;
        }
        match outcome {
            MergeOutcome::Merged { resolved_files, .. } => {
                println!("{} Task #{task_id} merged", "✓".green());
                for file in resolved_files {
                    println!("  resolved {file}");
                }
            }
            MergeOutcome::Declined { files } => {
                println!(
                    "{} Merge of task #{task_id} aborted; {} conflicted file(s) left unresolved",
                    "!".yellow(),
                    files.len()
                );
            }
        }
    }

    pub fn pushed(&self, task_id: u64, branch: &str) {
        if self.json {
            self.emit(&json!({ "taskId": task_id, "branch": branch }));
        } else {
            println!("{} Pushed {branch} (task #{task_id})", "✓".green());
        }
    }

    pub fn log_chunk(&self, chunk: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    }

    pub fn error(&self, error: &CommandError) {
        match error {
            CommandError::Task {
                op,
                task_id,
                source,
            } => {
                let remediation = source.remediation();
                if self.json {
                    self.emit(&json!({
                        "error": {
                            "operation": op,
                            "taskId": task_id,
                            "kind": source.kind(),
                            "message": source.to_string(),
                            "remediation": remediation,
                        }
                    }));
                    return;
                }
                let subject = match task_id {
                    Some(id) => format!("{op} task #{id}"),
                    None => op.to_string(),
                };
                eprintln!("{} {subject} failed: {source}", "error:".red().bold());
                if let Some(command) = remediation {
                    eprintln!("{} run `{command}`", "hint:".yellow());
                }
            }
            CommandError::Other(report) => {
                if self.json {
                    self.emit(&json!({ "error": { "message": format!("{report:#}") } }));
                } else {
                    eprintln!("{report:?}");
                }
            }
        }
    }

    fn emit<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("failed to encode output: {e}"),
        }
    }
}

fn status_label(status: TaskStatus) -> colored::ColoredString {
    let label = status.as_str();
    match status {
        TaskStatus::New => label.normal(),
        TaskStatus::InProgress | TaskStatus::Iterating => label.blue(),
        TaskStatus::Completed => label.green(),
        TaskStatus::Failed => label.red(),
        TaskStatus::Merged | TaskStatus::Pushed => label.magenta(),
    }
}
