//! Iteration records and context chaining.
//!
//! Each refinement request gets its own directory under
//! `tasks/<id>/iterations/<n>/`. A new iteration carries the plan and
//! changes of the most recent completed iteration so the agent can build on
//! earlier output.

use crate::state::error::{io_error, StoreError, StoreResult};
use crate::state::files::{read_artifact, read_json, write_json};
use crate::state::status::IterationStatusTracker;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tf_protocol::iteration_models::{
    Iteration, IterationState, IterationStatus, PreviousContext, ITERATION_SCHEMA_VERSION,
};
use tracing::{debug, info};

pub const ITERATION_FILE: &str = "iteration.json";
pub const STATUS_FILE: &str = "status.json";
pub const PLAN_FILE: &str = "plan.md";
pub const CHANGES_FILE: &str = "changes.md";
pub const SUMMARY_FILE: &str = "summary.md";

/// Creates and reads the iterations of one task.
#[derive(Debug, Clone)]
pub struct IterationManager {
    /// `tasks/<id>/iterations`
    root: PathBuf,
    task_id: u64,
}

impl IterationManager {
    pub fn new(root: impl Into<PathBuf>, task_id: u64) -> Self {
        Self {
            root: root.into(),
            task_id,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iteration_dir(&self, number: u32) -> PathBuf {
        self.root.join(number.to_string())
    }

    /// Write iteration 1 with no previous context.
    pub fn create_initial(&self, title: &str, description: &str) -> StoreResult<Iteration> {
        self.write_iteration(1, title, description, None)
    }

    /// Write iteration `number`, chaining context from the prior iteration.
    ///
    /// `number` must be exactly one past the latest existing iteration. When
    /// `previous_context` is `None`, it is composed from the most recent
    /// completed iteration's artifacts.
    pub fn create_iteration(
        &self,
        number: u32,
        title: &str,
        description: &str,
        previous_context: Option<PreviousContext>,
    ) -> StoreResult<Iteration> {
        let previous_context = match previous_context {
            Some(context) => Some(context),
            None => self.previous_context()?,
        };
        self.write_iteration(number, title, description, previous_context)
    }

    /// Iteration numbers present on disk, sorted numerically.
    ///
    /// Directory listing order is not meaningful ("10" sorts before "9"),
    /// so names are parsed before sorting.
    pub fn iteration_numbers(&self) -> StoreResult<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root)(e)),
        };
        let mut numbers: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
            .filter(|n| *n > 0)
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    pub fn latest(&self) -> StoreResult<Option<u32>> {
        Ok(self.iteration_numbers()?.last().copied())
    }

    /// Most recent iteration whose status reached `completed`.
    pub fn latest_completed(&self) -> StoreResult<Option<u32>> {
        for number in self.iteration_numbers()?.into_iter().rev() {
            let completed = self
                .read_status(number)
                .map(|s| s.status == IterationState::Completed)
                .unwrap_or(false);
            if completed {
                return Ok(Some(number));
            }
        }
        Ok(None)
    }

    /// Compose context from the most recent completed iteration, falling
    /// back to the latest iteration if none completed.
    ///
    /// Artifacts are read best-effort: unreadable files become absent fields.
    pub fn previous_context(&self) -> StoreResult<Option<PreviousContext>> {
        let source = match self.latest_completed()? {
            Some(number) => Some(number),
            None => self.latest()?,
        };
        Ok(source.map(|number| self.context_from(number)))
    }

    /// Read the plan and changes artifacts of one iteration.
    pub fn context_from(&self, number: u32) -> PreviousContext {
        let dir = self.iteration_dir(number);
        PreviousContext {
            plan: read_artifact(&dir.join(PLAN_FILE)),
            changes: read_artifact(&dir.join(CHANGES_FILE)),
            iteration_number: number,
        }
    }

    pub fn load(&self, number: u32) -> StoreResult<Iteration> {
        let path = self.iteration_dir(number).join(ITERATION_FILE);
        if !path.exists() {
            return Err(StoreError::IterationNotFound {
                task_id: self.task_id,
                iteration: number,
            });
        }
        read_json(&path)
    }

    pub fn read_status(&self, number: u32) -> StoreResult<IterationStatus> {
        read_json(&self.iteration_dir(number).join(STATUS_FILE))
    }

    /// Open the status tracker of an existing iteration.
    pub fn status_tracker(&self, number: u32) -> StoreResult<IterationStatusTracker> {
        IterationStatusTracker::open(self.iteration_dir(number).join(STATUS_FILE))
    }

    /// Replace the status record of an iteration with a fresh one, before
    /// the iteration is (re)run.
    pub fn reset_status(&self, number: u32) -> StoreResult<IterationStatusTracker> {
        if !self.iteration_dir(number).is_dir() {
            return Err(StoreError::IterationNotFound {
                task_id: self.task_id,
                iteration: number,
            });
        }
        IterationStatusTracker::create(self.iteration_dir(number).join(STATUS_FILE), self.task_id)
    }

    /// `summary.md` of every iteration that has one, oldest first.
    pub fn summaries(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .iteration_numbers()?
            .into_iter()
            .filter_map(|n| read_artifact(&self.iteration_dir(n).join(SUMMARY_FILE)))
            .filter(|s| !s.trim().is_empty())
            .collect())
    }

    fn write_iteration(
        &self,
        number: u32,
        title: &str,
        description: &str,
        previous_context: Option<PreviousContext>,
    ) -> StoreResult<Iteration> {
        let expected = self.latest()?.map_or(1, |n| n + 1);
        if number != expected {
            return Err(StoreError::IterationOutOfSequence {
                task_id: self.task_id,
                requested: number,
                expected,
            });
        }

        let dir = self.iteration_dir(number);
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let iteration = Iteration {
            id: self.task_id,
            iteration: number,
            title: title.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            previous_context,
            version: ITERATION_SCHEMA_VERSION.to_string(),
        };
        write_json(&dir.join(ITERATION_FILE), &iteration)?;
        IterationStatusTracker::create(dir.join(STATUS_FILE), self.task_id)?;

        info!(task_id = self.task_id, iteration = number, "Iteration created");
        debug!(
            has_context = iteration.previous_context.is_some(),
            "Iteration context"
        );
        Ok(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> IterationManager {
        IterationManager::new(dir.join("iterations"), 7)
    }

    #[test]
    fn test_create_initial_has_no_context() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());

        let iteration = manager.create_initial("Fix bug", "fix bug").unwrap();

        assert_eq!(iteration.iteration, 1);
        assert_eq!(iteration.id, 7);
        assert!(iteration.previous_context.is_none());
        let status = manager.read_status(1).unwrap();
        assert_eq!(status.status, IterationState::Initializing);
        assert_eq!(status.progress, 0);
    }

    #[test]
    fn test_numbering_is_strictly_sequential() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();

        let skipped = manager.create_iteration(3, "three", "three", None);
        assert!(matches!(
            skipped,
            Err(StoreError::IterationOutOfSequence { expected: 2, .. })
        ));

        let repeated = manager.create_iteration(1, "again", "again", None);
        assert!(repeated.is_err());

        for n in 2..=11 {
            manager.create_iteration(n, "next", "next", None).unwrap();
        }
        assert_eq!(manager.iteration_numbers().unwrap(), (1..=11).collect::<Vec<_>>());
        assert_eq!(manager.latest().unwrap(), Some(11));
    }

    #[test]
    fn test_context_comes_from_latest_completed_iteration() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();
        std::fs::write(manager.iteration_dir(1).join(PLAN_FILE), "plan one").unwrap();
        std::fs::write(manager.iteration_dir(1).join(CHANGES_FILE), "changes one").unwrap();
        manager.status_tracker(1).unwrap().complete("done").unwrap();

        // Iteration 2 fails without artifacts.
        manager.create_iteration(2, "two", "two", None).unwrap();
        manager.status_tracker(2).unwrap().fail("agent", "boom").unwrap();

        let third = manager.create_iteration(3, "three", "three", None).unwrap();
        let context = third.previous_context.unwrap();

        assert_eq!(context.iteration_number, 1);
        assert_eq!(context.plan.as_deref(), Some("plan one"));
        assert_eq!(context.changes.as_deref(), Some("changes one"));
    }

    #[test]
    fn test_numeric_sort_beats_lexical_order() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();
        for n in 2..=10 {
            manager.create_iteration(n, "n", "n", None).unwrap();
        }
        manager.status_tracker(9).unwrap().complete("done").unwrap();
        manager.status_tracker(10).unwrap().complete("done").unwrap();
        std::fs::write(manager.iteration_dir(10).join(PLAN_FILE), "plan ten").unwrap();

        assert_eq!(manager.latest_completed().unwrap(), Some(10));
        let context = manager.previous_context().unwrap().unwrap();
        assert_eq!(context.plan.as_deref(), Some("plan ten"));
    }

    #[test]
    fn test_missing_artifacts_degrade_to_absent_fields() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();
        manager.status_tracker(1).unwrap().complete("done").unwrap();

        let second = manager.create_iteration(2, "two", "two", None).unwrap();
        let context = second.previous_context.unwrap();

        assert_eq!(context.iteration_number, 1);
        assert!(context.is_empty());
    }

    #[test]
    fn test_explicit_context_is_kept() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();

        let context = PreviousContext {
            plan: Some("given".to_string()),
            changes: None,
            iteration_number: 1,
        };
        let second = manager
            .create_iteration(2, "two", "two", Some(context.clone()))
            .unwrap();

        assert_eq!(second.previous_context, Some(context));
        assert_eq!(manager.load(2).unwrap(), second);
    }

    #[test]
    fn test_summaries_in_order() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        manager.create_initial("one", "one").unwrap();
        manager.create_iteration(2, "two", "two", None).unwrap();
        std::fs::write(manager.iteration_dir(1).join(SUMMARY_FILE), "first").unwrap();
        std::fs::write(manager.iteration_dir(2).join(SUMMARY_FILE), "second").unwrap();

        assert_eq!(manager.summaries().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_load_missing_iteration() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(matches!(
            manager.load(4),
            Err(StoreError::IterationNotFound { iteration: 4, .. })
        ));
    }
}
