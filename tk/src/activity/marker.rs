//! Activity marker file

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, warn};

use crate::domain::is_valid_task_id;
use crate::worktree::worktree_path;

/// Name of the heartbeat file inside a task worktree
pub const ACTIVITY_MARKER_FILE: &str = ".task_activity";

/// Location of a task's activity marker
pub fn activity_marker_path(base_dir: &Path, task_id: &str) -> PathBuf {
    worktree_path(base_dir, task_id).join(ACTIVITY_MARKER_FILE)
}

/// Create or refresh the activity marker, setting its mtime to now
///
/// Parent directories are created as needed. Returns false when the task id
/// is not a single path segment or the marker cannot be written.
pub fn touch_activity(task_id: &str, base_dir: &Path) -> bool {
    debug!(%task_id, "touch_activity: called");
    if !is_valid_task_id(task_id) {
        warn!(%task_id, "Refusing to touch marker for invalid task id");
        return false;
    }
    let marker = activity_marker_path(base_dir, task_id);

    if let Some(parent) = marker.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!(%task_id, ?parent, "Failed to create activity marker directory: {}", e);
        return false;
    }

    if let Err(e) = OpenOptions::new().create(true).append(true).open(&marker) {
        warn!(%task_id, ?marker, "Failed to create activity marker: {}", e);
        return false;
    }

    match filetime::set_file_mtime(&marker, FileTime::now()) {
        Ok(()) => {
            debug!(%task_id, "touch_activity: marker refreshed");
            true
        }
        Err(e) => {
            warn!(%task_id, ?marker, "Failed to update activity marker mtime: {}", e);
            false
        }
    }
}
