//! Git worktree management
//!
//! Each task codes in its own worktree at `{base_dir}/.worktrees/{task_id}` on a
//! dedicated branch. Presence of that directory is the durable evidence that
//! coding started, so it is always probed live instead of being recorded.

mod manager;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::is_valid_task_id;

pub use manager::{WorktreeConfig, WorktreeError, WorktreeInfo, WorktreeManager};

/// Directory under the project root that holds task worktrees
pub const WORKTREES_DIR: &str = ".worktrees";

/// Deterministic worktree location for a task
pub fn worktree_path(base_dir: &Path, task_id: &str) -> PathBuf {
    base_dir.join(WORKTREES_DIR).join(task_id)
}

/// Whether a worktree directory exists for a task
///
/// Pure filesystem check; no git involved.
pub fn worktree_exists(base_dir: &Path, task_id: &str) -> bool {
    is_valid_task_id(task_id) && worktree_path(base_dir, task_id).exists()
}

/// Names of the task worktree directories under `{base_dir}/.worktrees`, sorted
///
/// A missing `.worktrees` directory yields an empty list. Other read errors
/// are logged and also yield what could be read.
pub fn list_worktree_ids(base_dir: &Path) -> Vec<String> {
    let worktrees_dir = base_dir.join(WORKTREES_DIR);
    debug!(?worktrees_dir, "list_worktree_ids: called");

    let entries = match fs::read_dir(&worktrees_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("list_worktree_ids: worktrees dir does not exist");
            return Vec::new();
        }
        Err(e) => {
            warn!(?worktrees_dir, "Could not list worktrees: {}", e);
            return Vec::new();
        }
    };

    let mut task_ids: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    task_ids.sort();
    debug!(count = task_ids.len(), "list_worktree_ids: returning task ids");
    task_ids
}

/// Version-control operations the recovery engine depends on
///
/// Failures are logged by the implementation and reported as `false`; they
/// never escape as errors.
#[async_trait]
pub trait WorktreeOps: Send + Sync {
    /// Create a fresh worktree and branch for the task
    async fn create(&self, task_id: &str, base_branch: Option<&str>) -> bool;

    /// Force-remove the task's worktree; an absent worktree counts as removed
    async fn remove(&self, task_id: &str) -> bool;
}
