//! Ready to coding: worktree, marker and state in one locked step

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::{RecoveryConfig, RecoveryEngine, default_state_dir};
use crate::activity::touch_activity;
use crate::domain::{TaskStatus, is_valid_task_id};
use crate::store::StoreError;

/// Outcome of trying to start coding on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCodingResult {
    Success,
    LockFailed,
    NoState,
    /// Task was not `ready`; nothing changed
    WrongStatus,
    /// Worktree creation failed; one attempt was counted
    WorktreeFailed,
    /// Retry budget already spent; nothing changed
    MaxRetries,
}

impl StartCodingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::LockFailed => "lock_failed",
            Self::NoState => "no_state",
            Self::WrongStatus => "wrong_status",
            Self::WorktreeFailed => "worktree_failed",
            Self::MaxRetries => "max_retries",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for StartCodingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RecoveryEngine {
    /// Move a `ready` task to `coding`, creating its worktree first
    ///
    /// The state record only says `coding` once the worktree exists, so a
    /// crash in between leaves a `ready` task with a worktree, which recovery
    /// turns into `coding`.
    pub async fn start_coding(&self, task_id: &str, base_branch: Option<&str>) -> Result<StartCodingResult, StoreError> {
        debug!(%task_id, ?base_branch, "RecoveryEngine::start_coding: called");

        if !is_valid_task_id(task_id) {
            warn!(%task_id, "Rejecting task id that is not a single path segment");
            return Ok(StartCodingResult::NoState);
        }

        let Some(_lock) = self.lock(task_id).await else {
            return Ok(StartCodingResult::LockFailed);
        };

        let Some(mut state) = self.store.load(task_id) else {
            return Ok(StartCodingResult::NoState);
        };

        if state.recovery_attempts >= self.config.max_recovery_attempts {
            warn!(
                %task_id,
                attempts = state.recovery_attempts,
                "Refusing to start task {}: retry budget exhausted",
                task_id
            );
            return Ok(StartCodingResult::MaxRetries);
        }

        if state.status != TaskStatus::Ready {
            debug!(%task_id, status = %state.status, "RecoveryEngine::start_coding: not ready");
            return Ok(StartCodingResult::WrongStatus);
        }

        if !self.worktrees.create(task_id, base_branch).await {
            warn!(%task_id, "WORKTREE_FAILED {}: could not create worktree", task_id);
            state.increment_attempts();
            state.touch();
            self.store.save(&state)?;
            return Ok(StartCodingResult::WorktreeFailed);
        }

        if !touch_activity(task_id, &self.config.base_dir) {
            warn!(%task_id, "Activity marker not written; the first heartbeat will create it");
        }

        state.set_status(TaskStatus::Coding);
        self.store.save(&state)?;
        info!(%task_id, "Task {} is now coding", task_id);
        Ok(StartCodingResult::Success)
    }
}

/// Start coding on a task using git-backed worktrees and default limits
pub async fn start_coding(
    task_id: &str,
    base_dir: &Path,
    state_dir: Option<&Path>,
    base_branch: Option<&str>,
) -> Result<StartCodingResult, StoreError> {
    let state_dir = state_dir.map(Path::to_path_buf).unwrap_or_else(|| default_state_dir(base_dir));
    RecoveryEngine::with_git(RecoveryConfig::with_state_dir(base_dir, state_dir))
        .start_coding(task_id, base_branch)
        .await
}
