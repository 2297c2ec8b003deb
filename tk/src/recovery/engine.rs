//! Recovery engine: the locked reconciliation state machine

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{ZOMBIE_THRESHOLD, ZombieDetector};
use crate::domain::{TaskState, TaskStatus, is_valid_task_id};
use crate::store::{DEFAULT_LOCK_TIMEOUT, StateStore, StoreError, TaskLock};
use crate::worktree::{WorktreeConfig, WorktreeManager, WorktreeOps, worktree_exists};

/// Automatic recoveries allowed before a task is failed for good
pub const MAX_RECOVERY_ATTEMPTS: u32 = 5;

/// State directory used when none is given: `{base_dir}/.taskkeeper/specs`
pub fn default_state_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(".taskkeeper").join("specs")
}

/// Outcome of one recovery pass over a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// State and filesystem agree
    NoAction,
    /// `coding` without a worktree went back to `ready`
    ResetToReady,
    /// Abandoned `planning` went back to `backlog`
    ResetToBacklog,
    /// `ready` with a worktree was advanced to `coding`
    UpdateToCoding,
    /// Retry budget exhausted; task is now `failed`
    MarkFailed,
    /// Abandoned `coding` worktree removed and task reset to `ready`
    ZombieCleanup,
    /// Lock not acquired in time; try again next cycle
    LockFailed,
    /// No usable state record
    NoState,
}

impl RecoveryAction {
    pub const ALL: [RecoveryAction; 8] = [
        Self::NoAction,
        Self::ResetToReady,
        Self::ResetToBacklog,
        Self::UpdateToCoding,
        Self::MarkFailed,
        Self::ZombieCleanup,
        Self::LockFailed,
        Self::NoState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::ResetToReady => "reset_to_ready",
            Self::ResetToBacklog => "reset_to_backlog",
            Self::UpdateToCoding => "update_to_coding",
            Self::MarkFailed => "mark_failed",
            Self::ZombieCleanup => "zombie_cleanup",
            Self::LockFailed => "lock_failed",
            Self::NoState => "no_state",
        }
    }

    /// Whether the action rewrote the state record
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Self::ResetToReady | Self::ResetToBacklog | Self::UpdateToCoding | Self::MarkFailed | Self::ZombieCleanup
        )
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Paths and limits for recovery
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Project root containing `.worktrees`
    pub base_dir: PathBuf,

    /// Root of per-task state directories
    pub state_dir: PathBuf,

    /// Longest wait for a task lock
    pub lock_timeout: Duration,

    /// Idle time before a task counts as abandoned
    pub zombie_threshold: Duration,

    /// Recovery attempts allowed before failing the task
    pub max_recovery_attempts: u32,
}

impl RecoveryConfig {
    /// Defaults for a project, with state under the default state directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_dir = default_state_dir(&base_dir);
        Self {
            base_dir,
            state_dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            zombie_threshold: ZOMBIE_THRESHOLD,
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS,
        }
    }

    /// Same defaults with an explicit state directory
    pub fn with_state_dir(base_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::new(base_dir)
        }
    }
}

/// Reconciles task state with worktree reality
pub struct RecoveryEngine {
    pub(super) config: RecoveryConfig,
    pub(super) store: StateStore,
    pub(super) detector: ZombieDetector,
    pub(super) worktrees: Arc<dyn WorktreeOps>,
}

impl RecoveryEngine {
    /// Create an engine with an explicit worktree backend
    pub fn new(config: RecoveryConfig, worktrees: Arc<dyn WorktreeOps>) -> Self {
        debug!(?config, "RecoveryEngine::new: called");
        Self {
            store: StateStore::new(&config.state_dir),
            detector: ZombieDetector::new(config.zombie_threshold),
            config,
            worktrees,
        }
    }

    /// Create an engine that manages worktrees with git in `base_dir`
    pub fn with_git(config: RecoveryConfig) -> Self {
        let manager = WorktreeManager::new(WorktreeConfig::with_repo(&config.base_dir));
        Self::new(config, Arc::new(manager))
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Store backing this engine, for unlocked inspection
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn detector(&self) -> &ZombieDetector {
        &self.detector
    }

    pub(super) async fn lock(&self, task_id: &str) -> Option<TaskLock> {
        TaskLock::acquire(&self.config.state_dir, task_id, self.config.lock_timeout).await
    }

    /// Detect and repair an inconsistent task, taking at most one action
    ///
    /// Runs entirely under the task lock. Only a failed write of the state
    /// record is returned as an error; every other outcome is an action.
    pub async fn recover_if_stuck(&self, task_id: &str) -> Result<RecoveryAction, StoreError> {
        debug!(%task_id, "RecoveryEngine::recover_if_stuck: called");

        if !is_valid_task_id(task_id) {
            warn!(%task_id, "Rejecting task id that is not a single path segment");
            return Ok(RecoveryAction::NoState);
        }

        let Some(_lock) = self.lock(task_id).await else {
            return Ok(RecoveryAction::LockFailed);
        };

        let Some(mut state) = self.store.load(task_id) else {
            debug!(%task_id, "RecoveryEngine::recover_if_stuck: no state");
            return Ok(RecoveryAction::NoState);
        };

        let action = self.reconcile(&mut state).await;
        if action.changed_state() {
            self.store.save(&state)?;
            info!(
                %task_id,
                %action,
                status = %state.status,
                attempts = state.recovery_attempts,
                "Recovery applied"
            );
        } else {
            debug!(%task_id, %action, "RecoveryEngine::recover_if_stuck: nothing to do");
        }
        Ok(action)
    }

    /// Pick and apply the one transition this state needs, in memory
    async fn reconcile(&self, state: &mut TaskState) -> RecoveryAction {
        let task_id = state.task_id.clone();
        let max = self.config.max_recovery_attempts;

        if state.recovery_attempts >= max {
            if state.status.is_terminal() {
                return RecoveryAction::NoAction;
            }
            warn!(
                %task_id,
                "MARK_FAILED {}: {} recovery attempts reached the limit of {}",
                task_id,
                state.recovery_attempts,
                max
            );
            state.mark_failed(format!(
                "Maximum recovery attempts ({}) exceeded; manual intervention required",
                max
            ));
            return RecoveryAction::MarkFailed;
        }

        let base_dir = &self.config.base_dir;
        match state.status {
            TaskStatus::Done | TaskStatus::Failed => RecoveryAction::NoAction,
            TaskStatus::Coding if !worktree_exists(base_dir, &task_id) => {
                info!(%task_id, "RESET_TO_READY {}: status is coding but no worktree exists", task_id);
                state.increment_attempts();
                state.set_status(TaskStatus::Ready);
                RecoveryAction::ResetToReady
            }
            TaskStatus::Coding if self.detector.is_zombie(state, base_dir) => {
                info!(%task_id, "ZOMBIE_CLEANUP {}: removing abandoned worktree", task_id);
                if !self.worktrees.remove(&task_id).await {
                    warn!(%task_id, "Zombie worktree removal failed, resetting state anyway");
                }
                state.increment_attempts();
                state.set_status(TaskStatus::Ready);
                RecoveryAction::ZombieCleanup
            }
            TaskStatus::Coding => RecoveryAction::NoAction,
            TaskStatus::Ready if worktree_exists(base_dir, &task_id) => {
                info!(%task_id, "UPDATE_TO_CODING {}: worktree exists but status is ready", task_id);
                state.set_status(TaskStatus::Coding);
                RecoveryAction::UpdateToCoding
            }
            TaskStatus::Ready => RecoveryAction::NoAction,
            // A planning task has no worktree, so this is effectively a timestamp check
            TaskStatus::Planning if self.detector.is_zombie(state, base_dir) => {
                info!(%task_id, "RESET_TO_BACKLOG {}: planning stalled", task_id);
                state.increment_attempts();
                state.set_status(TaskStatus::Backlog);
                RecoveryAction::ResetToBacklog
            }
            TaskStatus::Planning | TaskStatus::Backlog => RecoveryAction::NoAction,
        }
    }
}

/// Recover one task using git-backed worktrees and default limits
pub async fn recover_if_stuck(task_id: &str, base_dir: &Path, state_dir: &Path) -> Result<RecoveryAction, StoreError> {
    RecoveryEngine::with_git(RecoveryConfig::with_state_dir(base_dir, state_dir))
        .recover_if_stuck(task_id)
        .await
}
