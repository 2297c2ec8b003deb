//! Atomic JSON persistence of TaskState records

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::domain::{TaskState, is_valid_task_id};

/// Name of the canonical state file inside each task directory
pub const STATE_FILE: &str = "task_state.json";

/// Error types for state persistence
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create task directory {0}: {1}")]
    CreateDir(PathBuf, #[source] io::Error),

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write state to {0}: {1}")]
    Write(PathBuf, #[source] io::Error),

    #[error("Failed to list state directory {0}: {1}")]
    List(PathBuf, #[source] io::Error),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),
}

/// File-backed store of task state records
///
/// Performs no locking of its own. Read-modify-write sequences must hold the
/// [`TaskLock`](super::TaskLock) for the task.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `state_dir`
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        debug!(?state_dir, "StateStore::new: called");
        Self { state_dir }
    }

    /// Root directory of the store
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory holding one task's files
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.state_dir.join(task_id)
    }

    /// Path of the canonical record for a task
    pub fn state_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join(STATE_FILE)
    }

    /// Write a record atomically
    ///
    /// The full record is written to a temporary file in the task directory and
    /// renamed over the canonical path, so readers see either the old record or
    /// the new one. The temporary file is removed if anything fails.
    pub fn save(&self, state: &TaskState) -> Result<(), StoreError> {
        debug!(task_id = %state.task_id, status = %state.status, "StateStore::save: called");
        if !is_valid_task_id(&state.task_id) {
            return Err(StoreError::InvalidTaskId(state.task_id.clone()));
        }
        let task_dir = self.task_dir(&state.task_id);
        fs::create_dir_all(&task_dir).map_err(|e| StoreError::CreateDir(task_dir.clone(), e))?;

        let mut content = serde_json::to_string_pretty(state)?;
        content.push('\n');

        let path = self.state_path(&state.task_id);
        let result = Self::write_atomic(&task_dir, &path, content.as_bytes());
        if let Err(e) = &result {
            error!(task_id = %state.task_id, ?path, "Failed to save task state: {}", e);
        } else {
            debug!(task_id = %state.task_id, "StateStore::save: persisted");
        }
        result
    }

    fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".task_state.")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| StoreError::Write(path.to_path_buf(), e))?;

        tmp.write_all(content)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::Write(path.to_path_buf(), e))?;

        // A failed persist hands the temp file back inside the error; dropping it deletes it
        tmp.persist(path)
            .map_err(|e| StoreError::Write(path.to_path_buf(), e.error))?;
        Ok(())
    }

    /// Load a record
    ///
    /// Returns None when the record is missing, unreadable or invalid. Corrupt
    /// records are logged and otherwise treated exactly like missing ones.
    pub fn load(&self, task_id: &str) -> Option<TaskState> {
        debug!(%task_id, "StateStore::load: called");
        if !is_valid_task_id(task_id) {
            warn!(%task_id, "StateStore::load: invalid task id");
            return None;
        }
        let path = self.state_path(task_id);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(%task_id, "StateStore::load: no state file");
                return None;
            }
            Err(e) => {
                error!(%task_id, ?path, "Failed to read task state: {}", e);
                return None;
            }
        };

        let state: TaskState = match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                error!(%task_id, ?path, "Corrupt task state, treating as absent: {}", e);
                return None;
            }
        };

        if state.task_id != task_id {
            error!(
                %task_id,
                recorded = %state.task_id,
                ?path,
                "Task state belongs to a different task, treating as absent"
            );
            return None;
        }

        debug!(%task_id, status = %state.status, "StateStore::load: loaded");
        Some(state)
    }

    /// Task ids that have a state file, sorted
    pub fn list_task_ids(&self) -> Result<Vec<String>, StoreError> {
        debug!(state_dir = ?self.state_dir, "StateStore::list_task_ids: called");
        if !self.state_dir.exists() {
            debug!("StateStore::list_task_ids: state dir does not exist");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.state_dir).map_err(|e| StoreError::List(self.state_dir.clone(), e))?;

        let mut task_ids = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable state dir entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_dir()
                && path.join(STATE_FILE).is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                task_ids.push(name.to_string());
            }
        }

        task_ids.sort();
        debug!(count = task_ids.len(), "StateStore::list_task_ids: returning task ids");
        Ok(task_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use tempfile::tempdir;

    fn sample(task_id: &str) -> TaskState {
        TaskState {
            task_id: task_id.to_string(),
            status: TaskStatus::Coding,
            recovery_attempts: 2,
            last_activity: "2024-01-01T12:00:00+00:00".to_string(),
            failure_reason: None,
        }
    }

    #[test]
    fn test_save_creates_task_directory_and_file() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        store.save(&sample("new-task")).unwrap();

        assert!(temp.path().join("new-task").is_dir());
        assert!(temp.path().join("new-task").join(STATE_FILE).is_file());
    }

    #[test]
    fn test_save_writes_expected_json() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        store.save(&sample("json-test")).unwrap();

        let raw = fs::read_to_string(store.state_path("json-test")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["task_id"], "json-test");
        assert_eq!(value["status"], "coding");
        assert_eq!(value["recovery_attempts"], 2);
        assert_eq!(value["last_activity"], "2024-01-01T12:00:00+00:00");
        assert!(value["failure_reason"].is_null());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        store.save(&sample("atomic-test")).unwrap();
        store.save(&sample("atomic-test")).unwrap();

        let leftovers: Vec<_> = fs::read_dir(store.task_dir("atomic-test"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        let mut failed = sample("failed-task");
        failed.status = TaskStatus::Failed;
        failed.failure_reason = Some("Maximum recovery attempts (5) exceeded".to_string());

        store.save(&sample("coding-task")).unwrap();
        store.save(&failed).unwrap();

        assert_eq!(store.load("coding-task").unwrap(), sample("coding-task"));
        assert_eq!(store.load("failed-task").unwrap(), failed);
    }

    #[test]
    fn test_save_overwrites_existing() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        store.save(&sample("overwrite")).unwrap();
        let mut updated = sample("overwrite");
        updated.status = TaskStatus::Ready;
        updated.recovery_attempts = 3;
        store.save(&updated).unwrap();

        assert_eq!(store.load("overwrite").unwrap(), updated);
    }

    #[test]
    fn test_save_fails_when_task_dir_is_blocked() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        // A regular file where the task directory should be
        fs::write(temp.path().join("blocked"), "x").unwrap();

        let result = store.save(&sample("blocked"));
        assert!(matches!(result, Err(StoreError::CreateDir(..))));
    }

    #[test]
    fn test_save_rejects_escaping_task_id() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("state"));

        for bad in ["../outside", "", ".."] {
            let result = store.save(&sample(bad));
            assert!(matches!(result, Err(StoreError::InvalidTaskId(_))), "{bad:?}");
        }
        assert!(!temp.path().join("outside").exists());
        assert!(!temp.path().join(STATE_FILE).exists());
    }

    #[test]
    fn test_load_rejects_escaping_task_id() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("state"));
        // A record that a traversing id would otherwise reach
        fs::create_dir_all(temp.path().join("outside")).unwrap();
        fs::write(
            temp.path().join("outside").join(STATE_FILE),
            serde_json::to_string(&sample("../outside")).unwrap(),
        )
        .unwrap();

        assert!(store.load("../outside").is_none());
        assert!(store.load("").is_none());
    }

    #[test]
    fn test_load_missing_returns_none() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        assert!(store.load("nonexistent").is_none());
    }

    #[test]
    fn test_load_corrupt_json_returns_none() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        fs::create_dir_all(store.task_dir("corrupt")).unwrap();
        fs::write(store.state_path("corrupt"), "{ not valid json").unwrap();

        assert!(store.load("corrupt").is_none());
    }

    #[test]
    fn test_load_empty_file_returns_none() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        fs::create_dir_all(store.task_dir("empty")).unwrap();
        fs::write(store.state_path("empty"), "").unwrap();

        assert!(store.load("empty").is_none());
    }

    #[test]
    fn test_load_missing_required_field_returns_none() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        fs::create_dir_all(store.task_dir("partial")).unwrap();
        fs::write(
            store.state_path("partial"),
            r#"{"task_id": "partial", "status": "ready", "last_activity": "2024-01-01T00:00:00"}"#,
        )
        .unwrap();

        assert!(store.load("partial").is_none());
    }

    #[test]
    fn test_load_unknown_status_returns_none() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        fs::create_dir_all(store.task_dir("weird")).unwrap();
        fs::write(
            store.state_path("weird"),
            r#"{"task_id": "weird", "status": "in_progress", "recovery_attempts": 0,
                "last_activity": "2024-01-01T00:00:00", "failure_reason": null}"#,
        )
        .unwrap();

        assert!(store.load("weird").is_none());
    }

    #[test]
    fn test_load_accepts_missing_failure_reason() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());
        fs::create_dir_all(store.task_dir("no-reason")).unwrap();
        fs::write(
            store.state_path("no-reason"),
            r#"{"task_id": "no-reason", "status": "ready", "recovery_attempts": 1,
                "last_activity": "2024-01-01T00:00:00"}"#,
        )
        .unwrap();

        let state = store.load("no-reason").unwrap();
        assert_eq!(state.status, TaskStatus::Ready);
        assert!(state.failure_reason.is_none());
    }

    #[test]
    fn test_load_ignores_interrupted_write() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        // Crash before the first rename: only a partial temp file exists
        fs::create_dir_all(store.task_dir("crashed")).unwrap();
        fs::write(store.task_dir("crashed").join(".task_state.abc123.tmp"), r#"{"task_id": "cra"#).unwrap();
        assert!(store.load("crashed").is_none());

        // Crash during a later write: the old record is still what readers see
        store.save(&sample("crashed")).unwrap();
        fs::write(store.task_dir("crashed").join(".task_state.def456.tmp"), r#"{"status": "rea"#).unwrap();
        assert_eq!(store.load("crashed").unwrap(), sample("crashed"));
    }

    #[test]
    fn test_list_task_ids() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path());

        store.save(&sample("task-b")).unwrap();
        store.save(&sample("task-a")).unwrap();
        // Directory without a record is not a task
        fs::create_dir_all(temp.path().join("lock-only")).unwrap();

        assert_eq!(store.list_task_ids().unwrap(), vec!["task-a", "task-b"]);
    }

    #[test]
    fn test_list_task_ids_missing_dir() {
        let temp = tempdir().unwrap();
        let store = StateStore::new(temp.path().join("nope"));
        assert!(store.list_task_ids().unwrap().is_empty());
    }
}
