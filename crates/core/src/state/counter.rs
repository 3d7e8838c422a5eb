//! Process-wide task id counter.
//!
//! Several `taskforge` invocations may create tasks at the same time, so the
//! counter lives on disk and every allocation runs read-increment-persist
//! while holding an exclusive lock file.

use crate::state::error::{io_error, StoreError, StoreResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const COUNTER_FILE: &str = "next_id";
const LOCK_FILE: &str = "next_id.lock";

/// Locks older than this are assumed to belong to a crashed process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Allocates sequential task ids under `.taskforge/tasks/`.
#[derive(Debug, Clone)]
pub struct IdCounter {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl IdCounter {
    /// Create a counter rooted at `dir`. The directory is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Make sure the counter file exists, seeding it from existing task
    /// directories so a lost counter never reissues a used id.
    pub fn init(&self) -> StoreResult<()> {
        let _lock = self.lock()?;
        if !self.counter_path().exists() {
            let next = self.highest_existing_id()? + 1;
            self.write_next(next)?;
        }
        Ok(())
    }

    /// Atomically allocate the next task id.
    pub fn allocate(&self) -> StoreResult<u64> {
        let _lock = self.lock()?;
        let next = match self.read_next()? {
            Some(next) => next,
            None => self.highest_existing_id()? + 1,
        };
        self.write_next(next + 1)?;
        debug!(task_id = next, "Allocated task id");
        Ok(next)
    }

    /// Peek at the id the next allocation would return.
    pub fn peek(&self) -> StoreResult<u64> {
        match self.read_next()? {
            Some(next) => Ok(next),
            None => Ok(self.highest_existing_id()? + 1),
        }
    }

    fn counter_path(&self) -> PathBuf {
        self.dir.join(COUNTER_FILE)
    }

    fn read_next(&self) -> StoreResult<Option<u64>> {
        let path = self.counter_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => content
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| StoreError::InvalidRecord {
                    path,
                    reason: format!("Counter is not a number: {e}"),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    fn write_next(&self, next: u64) -> StoreResult<()> {
        let path = self.counter_path();
        let tmp = self.dir.join(format!("{COUNTER_FILE}.tmp"));
        std::fs::write(&tmp, format!("{next}\n")).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(path))
    }

    fn highest_existing_id(&self) -> StoreResult<u64> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };
        Ok(entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0))
    }

    fn lock(&self) -> StoreResult<CounterLock> {
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        CounterLock::acquire(&self.dir.join(LOCK_FILE), self.lock_timeout)
    }
}

/// Exclusive lock file, removed on drop.
#[derive(Debug)]
struct CounterLock {
    path: PathBuf,
}

impl CounterLock {
    fn acquire(path: &Path, timeout: Duration) -> StoreResult<Self> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(5);

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!(lock = %path.display(), "Breaking stale counter lock");
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout(path.to_path_buf()));
                    }
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_millis(100));
                }
                Err(e) => return Err(io_error(path)(e)),
            }
        }
    }
}

impl Drop for CounterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release counter lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
