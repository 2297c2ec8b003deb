//! Zombie detection
//!
//! A task is a zombie when neither its state timestamp nor its activity marker
//! has moved within the threshold. Anything that cannot be read counts as stale.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::marker::activity_marker_path;
use crate::domain::TaskState;

/// Idle time after which a task is considered abandoned
pub const ZOMBIE_THRESHOLD: Duration = Duration::from_secs(2 * 60 * 60);

/// Decides whether a task has been abandoned
#[derive(Debug, Clone)]
pub struct ZombieDetector {
    threshold: TimeDelta,
}

impl Default for ZombieDetector {
    fn default() -> Self {
        Self::new(ZOMBIE_THRESHOLD)
    }
}

impl ZombieDetector {
    pub fn new(threshold: Duration) -> Self {
        debug!(?threshold, "ZombieDetector::new: called");
        Self {
            threshold: TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Whether the task looks abandoned right now
    pub fn is_zombie(&self, state: &TaskState, base_dir: &Path) -> bool {
        self.is_zombie_at(state, base_dir, Utc::now())
    }

    /// Whether the task looks abandoned as of `now`
    pub fn is_zombie_at(&self, state: &TaskState, base_dir: &Path, now: DateTime<Utc>) -> bool {
        debug!(task_id = %state.task_id, %now, "ZombieDetector::is_zombie_at: called");

        let Some(last_activity) = state.last_activity_at() else {
            warn!(
                task_id = %state.task_id,
                "Invalid last_activity timestamp for task {}: {:?}",
                state.task_id,
                state.last_activity
            );
            return true;
        };

        let since_activity = now - last_activity;
        if since_activity < self.threshold {
            debug!(task_id = %state.task_id, "ZombieDetector::is_zombie_at: recent state activity");
            return false;
        }

        let marker = activity_marker_path(base_dir, &state.task_id);
        if !marker.exists() {
            info!(
                task_id = %state.task_id,
                "ZOMBIE_DETECTED {}: no activity marker, last_activity was {:.1} hours ago",
                state.task_id,
                hours(since_activity)
            );
            return true;
        }

        let marker_mtime = match fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(mtime) => DateTime::<Utc>::from(mtime),
            Err(e) => {
                warn!(task_id = %state.task_id, ?marker, "Could not read activity marker: {}", e);
                return true;
            }
        };

        let since_marker = now - marker_mtime;
        if since_marker >= self.threshold {
            info!(
                task_id = %state.task_id,
                "ZOMBIE_DETECTED {}: activity marker is {:.1} hours old",
                state.task_id,
                hours(since_marker)
            );
            return true;
        }

        debug!(task_id = %state.task_id, "ZombieDetector::is_zombie_at: recent heartbeat");
        false
    }
}

/// Zombie check with the default two hour threshold
pub fn is_zombie(state: &TaskState, base_dir: &Path) -> bool {
    ZombieDetector::default().is_zombie(state, base_dir)
}

fn hours(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::touch_activity;
    use crate::domain::TaskStatus;
    use filetime::FileTime;
    use proptest::prelude::*;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn state_with_activity(last_activity: String) -> TaskState {
        TaskState {
            task_id: "task-1".to_string(),
            status: TaskStatus::Coding,
            recovery_attempts: 0,
            last_activity,
            failure_reason: None,
        }
    }

    fn age_marker(base_dir: &Path, age: Duration) {
        let marker = activity_marker_path(base_dir, "task-1");
        let mtime = FileTime::from_system_time(SystemTime::now() - age);
        filetime::set_file_mtime(marker, mtime).unwrap();
    }

    #[test]
    fn test_threshold_is_two_hours() {
        assert_eq!(ZOMBIE_THRESHOLD, Duration::from_secs(7200));
    }

    #[test]
    fn test_recent_activity_is_not_zombie() {
        let temp = tempdir().unwrap();
        let state = state_with_activity((Utc::now() - TimeDelta::minutes(10)).to_rfc3339());
        assert!(!is_zombie(&state, temp.path()));
    }

    #[test]
    fn test_old_activity_without_marker_is_zombie() {
        let temp = tempdir().unwrap();
        let state = state_with_activity((Utc::now() - TimeDelta::hours(3)).to_rfc3339());
        assert!(is_zombie(&state, temp.path()));
    }

    #[test]
    fn test_threshold_boundary() {
        let temp = tempdir().unwrap();
        let detector = ZombieDetector::default();
        let now = Utc::now();

        let just_under = state_with_activity((now - TimeDelta::minutes(119)).to_rfc3339());
        assert!(!detector.is_zombie_at(&just_under, temp.path(), now));

        let exactly = state_with_activity((now - TimeDelta::hours(2)).to_rfc3339());
        assert!(detector.is_zombie_at(&exactly, temp.path(), now));

        let past = state_with_activity((now - TimeDelta::minutes(121)).to_rfc3339());
        assert!(detector.is_zombie_at(&past, temp.path(), now));
    }

    #[test]
    fn test_invalid_timestamp_is_zombie() {
        let temp = tempdir().unwrap();
        assert!(is_zombie(&state_with_activity("not-a-timestamp".to_string()), temp.path()));
        assert!(is_zombie(&state_with_activity(String::new()), temp.path()));
    }

    #[test]
    fn test_naive_timestamp_treated_as_utc() {
        let temp = tempdir().unwrap();
        let recent = (Utc::now() - TimeDelta::minutes(30)).naive_utc().format("%Y-%m-%dT%H:%M:%S");
        assert!(!is_zombie(&state_with_activity(recent.to_string()), temp.path()));

        let old = (Utc::now() - TimeDelta::hours(3)).naive_utc().format("%Y-%m-%dT%H:%M:%S");
        assert!(is_zombie(&state_with_activity(old.to_string()), temp.path()));
    }

    #[test]
    fn test_recent_marker_overrides_stale_state() {
        let temp = tempdir().unwrap();
        let state = state_with_activity((Utc::now() - TimeDelta::hours(3)).to_rfc3339());
        assert!(touch_activity("task-1", temp.path()));
        age_marker(temp.path(), Duration::from_secs(60));

        assert!(!is_zombie(&state, temp.path()));
    }

    #[test]
    fn test_stale_marker_is_zombie() {
        let temp = tempdir().unwrap();
        let state = state_with_activity((Utc::now() - TimeDelta::hours(3)).to_rfc3339());
        assert!(touch_activity("task-1", temp.path()));
        age_marker(temp.path(), Duration::from_secs(3 * 60 * 60));

        assert!(is_zombie(&state, temp.path()));
    }

    #[test]
    fn test_custom_threshold() {
        let temp = tempdir().unwrap();
        let detector = ZombieDetector::new(Duration::from_secs(60));
        let state = state_with_activity((Utc::now() - TimeDelta::minutes(5)).to_rfc3339());
        assert!(detector.is_zombie(&state, temp.path()));
    }

    proptest! {
        #[test]
        fn prop_state_timestamp_alone_decides_without_marker(age_secs in 0i64..(6 * 3600)) {
            let temp = tempdir().unwrap();
            let now = Utc::now();
            let state = state_with_activity((now - TimeDelta::seconds(age_secs)).to_rfc3339());
            let zombie = ZombieDetector::default().is_zombie_at(&state, temp.path(), now);
            prop_assert_eq!(zombie, age_secs >= 7200);
        }
    }
}
