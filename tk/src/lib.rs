//! Taskkeeper - crash-safe task state for worktree-isolated coding agents
//!
//! Each task carries a small JSON state record and, while coding, a git
//! worktree. The two can drift apart when a worker dies or a process crashes
//! between steps. Taskkeeper reconciles them under a per-task file lock and
//! applies at most one corrective transition per pass, with a bounded number of
//! automatic attempts before a task is failed for a human to look at.
//!
//! # Core Concepts
//!
//! - **State is a belief, the worktree is evidence**: worktree presence is probed live
//! - **One action per pass**: every recovery call is idempotent once consistent
//! - **Bounded retries**: corrective transitions count toward a fixed budget
//! - **Cross-process safety**: all coordination goes through `flock` on the state dir
//!
//! # Modules
//!
//! - [`domain`] - Task status and state record
//! - [`store`] - Atomic persistence and per-task locks
//! - [`worktree`] - Git worktree creation and removal
//! - [`activity`] - Activity marker, heartbeat and zombie detection
//! - [`recovery`] - Recovery engine, coding starter and sweep
//! - [`report`] - Read-only status overview
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod activity;
pub mod cli;
pub mod config;
pub mod domain;
pub mod recovery;
pub mod report;
pub mod store;
pub mod worktree;

// Re-export commonly used types
pub use activity::{Heartbeat, ZombieDetector, is_zombie, touch_activity};
pub use config::Config;
pub use domain::{TaskState, TaskStatus};
pub use recovery::{
    MAX_RECOVERY_ATTEMPTS, Poller, RecoveryAction, RecoveryConfig, RecoveryEngine, RecoveryStats, StartCodingResult,
    recover_all, recover_if_stuck, start_coding,
};
pub use store::{StateStore, StoreError, TaskLock};
pub use worktree::{WorktreeConfig, WorktreeError, WorktreeManager, WorktreeOps, worktree_exists, worktree_path};
