//! Task recovery
//!
//! Reconciles each task's stored status with what is actually on disk, under
//! the task's lock, and applies at most one corrective transition per call.
//! The coding starter is the forward counterpart: it builds the worktree,
//! marker and `coding` record together.

mod engine;
mod starter;
mod sweep;

pub use engine::{
    MAX_RECOVERY_ATTEMPTS, RecoveryAction, RecoveryConfig, RecoveryEngine, default_state_dir, recover_if_stuck,
};
pub use starter::{StartCodingResult, start_coding};
pub use sweep::{DEFAULT_POLL_INTERVAL, Poller, RecoveryStats, recover_all};
