//! Iteration status tracking (`status.json`).

use crate::state::error::StoreResult;
use crate::state::files::{read_json, write_json};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tf_protocol::iteration_models::{IterationState, IterationStatus, ITERATION_SCHEMA_VERSION};

/// Owns the status record of one iteration and persists every change.
#[derive(Debug, Clone)]
pub struct IterationStatusTracker {
    path: PathBuf,
    status: IterationStatus,
}

impl IterationStatusTracker {
    /// Write a fresh `initializing` record.
    pub fn create(path: impl Into<PathBuf>, task_id: u64) -> StoreResult<Self> {
        let now = Utc::now();
        let tracker = Self {
            path: path.into(),
            status: IterationStatus {
                task_id,
                status: IterationState::Initializing,
                current_step: "Initializing".to_string(),
                progress: 0,
                started_at: now,
                updated_at: now,
                completed_at: None,
                error: None,
                version: ITERATION_SCHEMA_VERSION.to_string(),
            },
        };
        tracker.save()?;
        Ok(tracker)
    }

    /// Load an existing record.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let status = read_json(&path)?;
        Ok(Self { path, status })
    }

    pub fn status(&self) -> &IterationStatus {
        &self.status
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record progress. `progress` is capped at 99 while running; terminal
    /// states are finished through [`complete`](Self::complete) and
    /// [`fail`](Self::fail).
    pub fn update(
        &mut self,
        state: IterationState,
        step: &str,
        progress: u8,
        error: Option<String>,
    ) -> StoreResult<()> {
        match state {
            IterationState::Completed => return self.complete(step),
            IterationState::Failed => {
                let error = error
                    .or_else(|| self.status.error.clone())
                    .unwrap_or_else(|| format!("{step} failed"));
                return self.fail(step, &error);
            }
            IterationState::Initializing | IterationState::Running => {}
        }
        self.status.status = state;
        self.status.current_step = step.to_string();
        self.status.progress = progress.min(99);
        if error.is_some() {
            self.status.error = error;
        }
        self.touch();
        self.save()
    }

    /// Mark the iteration completed at 100%.
    pub fn complete(&mut self, step: &str) -> StoreResult<()> {
        self.status.status = IterationState::Completed;
        self.status.current_step = step.to_string();
        self.status.progress = 100;
        self.touch();
        self.status.completed_at = Some(self.status.updated_at);
        self.save()
    }

    /// Mark the iteration failed at 100% and record the error.
    pub fn fail(&mut self, step: &str, error: &str) -> StoreResult<()> {
        self.status.status = IterationState::Failed;
        self.status.current_step = step.to_string();
        self.status.progress = 100;
        self.status.error = Some(error.to_string());
        self.touch();
        self.status.completed_at = Some(self.status.updated_at);
        self.save()
    }

    /// Set `updated_at` to now, nudging it forward if the clock has not
    /// advanced since the previous write.
    fn touch(&mut self) {
        self.status.updated_at = next_timestamp(self.status.updated_at, Utc::now());
    }

    fn save(&self) -> StoreResult<()> {
        write_json(&self.path, &self.status)
    }
}

fn next_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
