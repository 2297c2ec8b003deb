//! Cross-process per-task lock
//!
//! An exclusive advisory lock on `{state_dir}/{task_id}/.lock`. Locks for
//! different tasks never contend with each other.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::domain::is_valid_task_id;


/// Name of the lock file inside each task directory
pub const LOCK_FILE: &str = ".lock";

/// How long to wait for a contended lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Held lock on one task; released when dropped
#[derive(Debug)]
pub struct TaskLock {
    task_id: String,
    path: PathBuf,
    file: File,
}

impl TaskLock {
    /// Acquire the lock, waiting up to `timeout`
    ///
    /// Returns None when the lock could not be taken in time or the lock file
    /// could not be opened. Callers should retry on a later cycle.
    pub async fn acquire(state_dir: &Path, task_id: &str, timeout: Duration) -> Option<Self> {
        debug!(%task_id, ?timeout, "TaskLock::acquire: called");
        let file = Self::open_lock_file(state_dir, task_id)?;
        let path = Self::lock_path(state_dir, task_id);
        let started = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(%task_id, waited_ms = started.elapsed().as_millis() as u64, "TaskLock::acquire: acquired");
                    return Some(Self {
                        task_id: task_id.to_string(),
                        path,
                        file,
                    });
                }
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= timeout {
                        warn!(
                            %task_id,
                            "LOCK_TIMEOUT {}: could not acquire lock in {}s",
                            task_id,
                            timeout.as_secs_f64()
                        );
                        return None;
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL.min(timeout)).await;
                }
                Err(e) => {
                    warn!(%task_id, ?path, "Failed to lock task: {}", e);
                    return None;
                }
            }
        }
    }

    /// Take the lock only if it is free right now
    pub fn try_acquire(state_dir: &Path, task_id: &str) -> Option<Self> {
        debug!(%task_id, "TaskLock::try_acquire: called");
        let file = Self::open_lock_file(state_dir, task_id)?;
        match file.try_lock_exclusive() {
            Ok(()) => Some(Self {
                task_id: task_id.to_string(),
                path: Self::lock_path(state_dir, task_id),
                file,
            }),
            Err(e) => {
                debug!(%task_id, "TaskLock::try_acquire: not acquired: {}", e);
                None
            }
        }
    }

    /// Path of the lock file for a task
    pub fn lock_path(state_dir: &Path, task_id: &str) -> PathBuf {
        state_dir.join(task_id).join(LOCK_FILE)
    }

    /// Task this lock guards
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn open_lock_file(state_dir: &Path, task_id: &str) -> Option<File> {
        if !is_valid_task_id(task_id) {
            warn!(%task_id, "Refusing to lock invalid task id");
            return None;
        }
        let task_dir = state_dir.join(task_id);
        if let Err(e) = fs::create_dir_all(&task_dir) {
            warn!(%task_id, ?task_dir, "Failed to create task directory for lock: {}", e);
            return None;
        }

        let path = task_dir.join(LOCK_FILE);
        match OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(%task_id, ?path, "Failed to open lock file: {}", e);
                None
            }
        }
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        // Release must never fail the surrounding operation
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(task_id = %self.task_id, path = ?self.path, "Failed to release task lock: {}", e);
        } else {
            debug!(task_id = %self.task_id, "TaskLock::drop: released");
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
