//! Liveness tracking for tasks
//!
//! A running worker refreshes a zero-content marker file inside its worktree.
//! The marker's mtime and the state record's `last_activity` are the two
//! signals the zombie detector weighs.

mod heartbeat;
mod marker;
mod zombie;

pub use heartbeat::Heartbeat;
pub use marker::{ACTIVITY_MARKER_FILE, activity_marker_path, touch_activity};
pub use zombie::{ZOMBIE_THRESHOLD, ZombieDetector, is_zombie};
