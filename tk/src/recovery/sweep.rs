//! Recovery sweep and the polling loop that drives it

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::engine::{RecoveryAction, RecoveryEngine};
use crate::store::StoreError;

/// Default time between sweeps
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Per-action counts from one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Tasks visited
    pub scanned: usize,
    pub no_action: usize,
    pub reset_to_ready: usize,
    pub reset_to_backlog: usize,
    pub update_to_coding: usize,
    pub mark_failed: usize,
    pub zombie_cleanup: usize,
    pub lock_failed: usize,
    pub no_state: usize,
    /// Tasks whose repaired state could not be written
    pub save_errors: usize,
}

impl RecoveryStats {
    /// Count one action
    pub fn record(&mut self, action: RecoveryAction) {
        let slot = match action {
            RecoveryAction::NoAction => &mut self.no_action,
            RecoveryAction::ResetToReady => &mut self.reset_to_ready,
            RecoveryAction::ResetToBacklog => &mut self.reset_to_backlog,
            RecoveryAction::UpdateToCoding => &mut self.update_to_coding,
            RecoveryAction::MarkFailed => &mut self.mark_failed,
            RecoveryAction::ZombieCleanup => &mut self.zombie_cleanup,
            RecoveryAction::LockFailed => &mut self.lock_failed,
            RecoveryAction::NoState => &mut self.no_state,
        };
        *slot += 1;
    }

    /// Count for one action
    pub fn count(&self, action: RecoveryAction) -> usize {
        match action {
            RecoveryAction::NoAction => self.no_action,
            RecoveryAction::ResetToReady => self.reset_to_ready,
            RecoveryAction::ResetToBacklog => self.reset_to_backlog,
            RecoveryAction::UpdateToCoding => self.update_to_coding,
            RecoveryAction::MarkFailed => self.mark_failed,
            RecoveryAction::ZombieCleanup => self.zombie_cleanup,
            RecoveryAction::LockFailed => self.lock_failed,
            RecoveryAction::NoState => self.no_state,
        }
    }

    /// Tasks whose state was rewritten
    pub fn repaired(&self) -> usize {
        RecoveryAction::ALL
            .iter()
            .filter(|a| a.changed_state())
            .map(|a| self.count(*a))
            .sum()
    }
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scanned: {}, repaired: {}, reset_to_ready: {}, reset_to_backlog: {}, update_to_coding: {}, \
             zombie_cleanup: {}, mark_failed: {}, lock_failed: {}, no_state: {}, save_errors: {}",
            self.scanned,
            self.repaired(),
            self.reset_to_ready,
            self.reset_to_backlog,
            self.update_to_coding,
            self.zombie_cleanup,
            self.mark_failed,
            self.lock_failed,
            self.no_state,
            self.save_errors
        )
    }
}

/// Run `recover_if_stuck` once for every known task
///
/// A task whose repaired state fails to save is counted and skipped so one bad
/// directory cannot stall the sweep. Only failing to enumerate tasks is an error.
pub async fn recover_all(engine: &RecoveryEngine) -> Result<RecoveryStats, StoreError> {
    debug!("recover_all: called");
    let task_ids = engine.store().list_task_ids()?;
    let mut stats = RecoveryStats::default();

    for task_id in &task_ids {
        stats.scanned += 1;
        match engine.recover_if_stuck(task_id).await {
            Ok(action) => stats.record(action),
            Err(e) => {
                error!(%task_id, "Failed to save recovered state for {}: {}", task_id, e);
                stats.save_errors += 1;
            }
        }
    }

    debug!(%stats, "recover_all: complete");
    Ok(stats)
}

/// Periodically sweeps all tasks until told to stop
pub struct Poller {
    engine: Arc<RecoveryEngine>,
    interval: Duration,
}

impl Poller {
    pub fn new(engine: Arc<RecoveryEngine>, interval: Duration) -> Self {
        debug!(?interval, "Poller::new: called");
        // tokio intervals reject a zero period
        let interval = interval.max(Duration::from_millis(1));
        Self { engine, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One sweep, logged
    pub async fn run_once(&self) -> Result<RecoveryStats, StoreError> {
        let stats = recover_all(&self.engine).await?;
        if stats.repaired() > 0 || stats.save_errors > 0 {
            info!(%stats, "Recovery sweep complete");
        } else {
            debug!(%stats, "Poller::run_once: nothing to repair");
        }
        Ok(stats)
    }

    /// Sweep immediately and then every interval until `shutdown` resolves
    ///
    /// A failed sweep is logged and retried on the next tick. Returns the
    /// number of sweeps that completed.
    pub async fn run<F>(&self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        info!(interval_secs = self.interval.as_secs(), "Poller started");
        let mut ticker = tokio::time::interval(self.interval);
        tokio::pin!(shutdown);
        let mut sweeps = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(_) => sweeps += 1,
                        Err(e) => warn!("Recovery sweep failed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    debug!("Poller::run: shutdown signal received");
                    break;
                }
            }
        }

        info!(sweeps, "Poller stopped");
        sweeps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskState, TaskStatus};
    use crate::recovery::RecoveryConfig;
    use crate::worktree::WorktreeOps;
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use tempfile::{TempDir, tempdir};

    struct NoWorktrees;

    #[async_trait]
    impl WorktreeOps for NoWorktrees {
        async fn create(&self, _task_id: &str, _base_branch: Option<&str>) -> bool {
            false
        }

        async fn remove(&self, _task_id: &str) -> bool {
            true
        }
    }

    fn engine() -> (TempDir, Arc<RecoveryEngine>) {
        let temp = tempdir().unwrap();
        let engine = RecoveryEngine::new(RecoveryConfig::new(temp.path()), Arc::new(NoWorktrees));
        (temp, Arc::new(engine))
    }

    fn seed(engine: &RecoveryEngine, task_id: &str, status: TaskStatus, age: TimeDelta) {
        let mut state = TaskState::new(task_id, status);
        state.last_activity = (Utc::now() - age).to_rfc3339();
        engine.store().save(&state).unwrap();
    }

    #[tokio::test]
    async fn test_recover_all_counts_actions() {
        let (_temp, engine) = engine();
        seed(&engine, "a", TaskStatus::Coding, TimeDelta::minutes(1));
        seed(&engine, "b", TaskStatus::Planning, TimeDelta::hours(5));
        seed(&engine, "c", TaskStatus::Done, TimeDelta::hours(5));
        seed(&engine, "d", TaskStatus::Backlog, TimeDelta::minutes(1));

        let stats = recover_all(&engine).await.unwrap();

        assert_eq!(stats.scanned, 4);
        assert_eq!(stats.reset_to_ready, 1);
        assert_eq!(stats.reset_to_backlog, 1);
        assert_eq!(stats.no_action, 2);
        assert_eq!(stats.repaired(), 2);
        assert_eq!(stats.save_errors, 0);
    }

    #[tokio::test]
    async fn test_recover_all_empty_state_dir() {
        let (_temp, engine) = engine();
        assert_eq!(recover_all(&engine).await.unwrap(), RecoveryStats::default());
    }

    #[test]
    fn test_stats_display() {
        let mut stats = RecoveryStats::default();
        stats.scanned = 2;
        stats.record(RecoveryAction::ZombieCleanup);
        stats.record(RecoveryAction::LockFailed);

        let text = stats.to_string();
        assert!(text.contains("scanned: 2"));
        assert!(text.contains("repaired: 1"));
        assert!(text.contains("zombie_cleanup: 1"));
        assert!(text.contains("lock_failed: 1"));
    }

    #[tokio::test]
    async fn test_poller_sweeps_until_shutdown() {
        let (_temp, engine) = engine();
        seed(&engine, "a", TaskStatus::Coding, TimeDelta::minutes(1));
        let poller = Poller::new(engine.clone(), Duration::from_millis(20));

        let sweeps = poller.run(tokio::time::sleep(Duration::from_millis(110))).await;

        assert!(sweeps >= 2);
        let state = engine.store().load("a").unwrap();
        assert_eq!(state.status, TaskStatus::Ready);
        assert_eq!(state.recovery_attempts, 1);
    }
}
