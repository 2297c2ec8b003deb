//! Read-only task overview for `tk status`
//!
//! Nothing here takes a lock, so a report can be momentarily stale while a
//! recovery or start is in flight.

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::activity::ZombieDetector;
use crate::domain::TaskStatus;
use crate::store::{StateStore, StoreError};
use crate::worktree::{list_worktree_ids, worktree_exists};

/// One task as it looks on disk right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    /// None when the record is missing or unreadable
    pub status: Option<String>,
    pub recovery_attempts: Option<u32>,
    pub last_activity: Option<String>,
    pub failure_reason: Option<String>,
    pub worktree: bool,
    pub zombie: bool,
}

/// Reports for every task with state, plus worktrees that have none
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub tasks: Vec<TaskReport>,
    /// Task ids with a worktree directory but no state record
    pub orphan_worktrees: Vec<String>,
}

/// Describe a single task
pub fn task_report(store: &StateStore, detector: &ZombieDetector, base_dir: &Path, task_id: &str) -> TaskReport {
    debug!(%task_id, "task_report: called");
    let worktree = worktree_exists(base_dir, task_id);
    match store.load(task_id) {
        Some(state) => TaskReport {
            zombie: match state.status {
                TaskStatus::Coding | TaskStatus::Planning => detector.is_zombie(&state, base_dir),
                TaskStatus::Backlog | TaskStatus::Ready | TaskStatus::Done | TaskStatus::Failed => false,
            },
            task_id: state.task_id,
            status: Some(state.status.to_string()),
            recovery_attempts: Some(state.recovery_attempts),
            last_activity: Some(state.last_activity),
            failure_reason: state.failure_reason,
            worktree,
        },
        None => TaskReport {
            task_id: task_id.to_string(),
            status: None,
            recovery_attempts: None,
            last_activity: None,
            failure_reason: None,
            worktree,
            zombie: false,
        },
    }
}

/// Describe every known task and any orphaned worktrees
pub fn status_report(store: &StateStore, detector: &ZombieDetector, base_dir: &Path) -> Result<StatusReport, StoreError> {
    debug!(?base_dir, "status_report: called");
    let task_ids = store.list_task_ids()?;
    let tasks: Vec<_> = task_ids
        .iter()
        .map(|id| task_report(store, detector, base_dir, id))
        .collect();

    let orphan_worktrees = list_worktree_ids(base_dir)
        .into_iter()
        .filter(|name| !task_ids.contains(name))
        .collect();

    Ok(StatusReport { tasks, orphan_worktrees })
}
