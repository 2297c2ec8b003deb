//! TaskState domain type
//!
//! One record per task. The record is the stored belief about where a task is in
//! its lifecycle; worktree presence is never stored here and is always probed live.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued, not started
    Backlog,
    /// Being planned
    Planning,
    /// Planned and waiting for a worktree
    Ready,
    /// Actively worked on inside a worktree
    Coding,
    /// Completed successfully
    Done,
    /// Gave up; `failure_reason` says why
    Failed,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        Self::Backlog,
        Self::Planning,
        Self::Ready,
        Self::Coding,
        Self::Done,
        Self::Failed,
    ];

    /// Terminal statuses are never touched by recovery
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::Coding => "coding",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "TaskStatus::from_str: called");
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("Unknown task status: {}", s))
    }
}

/// Persistent state of a single task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// Stable identifier; also the directory and branch name component
    pub task_id: String,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Number of corrective transitions applied so far
    pub recovery_attempts: u32,

    /// ISO-8601 timestamp of the last status change or reported progress.
    ///
    /// Kept as the raw string so an unparseable value survives a load and can be
    /// judged by the zombie detector instead of rejecting the whole record.
    pub last_activity: String,

    /// Why the task failed; set only when `status` is `failed`
    pub failure_reason: Option<String>,
}

impl TaskState {
    /// Create a fresh record with no recovery history
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        let task_id = task_id.into();
        debug!(%task_id, %status, "TaskState::new: called");
        Self {
            task_id,
            status,
            recovery_attempts: 0,
            last_activity: utc_now(),
            failure_reason: None,
        }
    }

    /// Set status and bump `last_activity`
    pub fn set_status(&mut self, status: TaskStatus) {
        debug!(task_id = %self.task_id, from = %self.status, to = %status, "TaskState::set_status: called");
        self.status = status;
        self.touch();
    }

    /// Transition to `failed` with a reason
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.set_status(TaskStatus::Failed);
    }

    /// Count one more recovery attempt
    pub fn increment_attempts(&mut self) {
        self.recovery_attempts = self.recovery_attempts.saturating_add(1);
        debug!(task_id = %self.task_id, attempts = self.recovery_attempts, "TaskState::increment_attempts: called");
    }

    /// Update `last_activity` to now
    pub fn touch(&mut self) {
        self.last_activity = utc_now();
    }

    /// Parsed `last_activity`, or None when the stored value is not a timestamp
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_activity)
    }
}

/// Current time as an RFC 3339 string with an explicit UTC offset
pub fn utc_now() -> String {
    Utc::now().to_rfc3339()
}

/// Parse an ISO-8601 timestamp, treating naive values as UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Whether a task id is usable as a single directory name
///
/// Ids are joined onto the state and worktree roots, so anything that could
/// name a parent, a nested path or the root itself is rejected.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id != "."
        && task_id != ".."
        && !task_id.contains(['/', '\\', '\0'])
}
