//! Durable task state and per-task locking
//!
//! These are the only two pieces that touch the state directory directly.
//!
//! ```text
//! {state_dir}/
//! └── {task_id}/
//!     ├── task_state.json   # canonical TaskState record
//!     └── .lock             # exclusive lock file, no content
//! ```

mod lock;
mod state_store;

pub use lock::{DEFAULT_LOCK_TIMEOUT, LOCK_FILE, TaskLock};
pub use state_store::{STATE_FILE, StateStore, StoreError};
