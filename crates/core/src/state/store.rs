//! On-disk task store under `.taskforge/tasks/`.
//!
//! ```text
//! .taskforge/tasks/
//! ├── next_id
//! └── <id>/
//!     ├── task.json
//!     └── iterations/<n>/{iteration.json,status.json,plan.md,changes.md,summary.md}
//! ```

use crate::state::counter::IdCounter;
use crate::state::error::{io_error, StoreError, StoreResult};
use crate::state::files::{from_value, parse_version, read_json_value};
use crate::state::task::TaskRecord;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tf_protocol::task_models::{Task, TASK_SCHEMA_VERSION};
use tracing::{debug, warn};

const TASK_FILE: &str = "task.json";
const SUPPORTED_MAJOR: u32 = 1;

/// Persistence for task records, keyed by task id.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
    counter: IdCounter,
}

impl TaskStore {
    /// Open the store rooted at `root` (usually `.taskforge/tasks`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            counter: IdCounter::new(root.clone()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn counter(&self) -> &IdCounter {
        &self.counter
    }

    /// Allocate the id for a new task.
    ///
    /// The counter lock backs off with thread sleeps, so allocation runs on
    /// the blocking pool.
    pub async fn allocate_id(&self) -> StoreResult<u64> {
        let counter = self.counter.clone();
        tokio::task::spawn_blocking(move || counter.allocate())
            .await
            .map_err(|e| StoreError::Background(e.to_string()))?
    }

    pub fn task_dir(&self, id: u64) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn task_path(&self, id: u64) -> PathBuf {
        self.task_dir(id).join(TASK_FILE)
    }

    pub fn iterations_dir(&self, id: u64) -> PathBuf {
        self.task_dir(id).join("iterations")
    }

    pub fn exists(&self, id: u64) -> bool {
        self.task_path(id).exists()
    }

    /// Persist a brand-new task.
    pub fn create(&self, task: Task) -> StoreResult<TaskRecord> {
        let path = self.task_path(task.id);
        if path.exists() {
            return Err(StoreError::InvalidRecord {
                path,
                reason: format!("Task {} already exists", task.id),
            });
        }
        let record = TaskRecord::new(task, path);
        record.save()?;
        debug!(task_id = record.id(), "Task record created");
        Ok(record)
    }

    /// Load a task, migrating older schema versions forward.
    ///
    /// Unknown status values and unsupported schema versions are rejected
    /// rather than coerced.
    pub fn load(&self, id: u64) -> StoreResult<TaskRecord> {
        let path = self.task_path(id);
        if !path.exists() {
            return Err(StoreError::TaskNotFound(id));
        }
        let value = migrate_task(&path, read_json_value(&path)?)?;
        let task: Task = from_value(&path, value)?;
        if task.iterations == 0 {
            return Err(StoreError::InvalidRecord {
                path,
                reason: "iterations must be at least 1".to_string(),
            });
        }
        if task.id != id {
            return Err(StoreError::InvalidRecord {
                path,
                reason: format!("Record id {} does not match directory {id}", task.id),
            });
        }
        Ok(TaskRecord::new(task, path))
    }

    /// All tasks sorted by id. Unreadable records are skipped with a warning.
    pub fn list(&self) -> StoreResult<Vec<Task>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };

        let mut ids: Vec<u64> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .collect();
        ids.sort_unstable();

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(id) {
                Ok(record) => tasks.push(record.into_task()),
                Err(StoreError::TaskNotFound(_)) => {}
                Err(e) => warn!(task_id = id, error = %e, "Skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }
}

/// Bring a raw task record up to the current schema.
///
/// - `1.0` records predate restart tracking; `restartCount` starts at 0.
/// - Newer minors of the supported major load as-is.
fn migrate_task(path: &Path, mut value: Value) -> StoreResult<Value> {
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1.0")
        .to_string();
    let (major, minor) = parse_version(path, &version)?;
    if major != SUPPORTED_MAJOR {
        return Err(StoreError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!("Unsupported schema version {version}"),
        });
    }

    let Some(object) = value.as_object_mut() else {
        return Err(StoreError::InvalidRecord {
            path: path.to_path_buf(),
            reason: "Task record is not an object".to_string(),
        });
    };

    if minor < 1 {
        object
            .entry("restartCount")
            .or_insert_with(|| Value::from(0));
        object.insert(
            "version".to_string(),
            Value::String(TASK_SCHEMA_VERSION.to_string()),
        );
        debug!(path = %path.display(), from = %version, "Migrated task record");
    }
    Ok(value)
}
