//! Domain types for task lifecycle tracking

mod state;

pub use state::{TaskState, TaskStatus, is_valid_task_id, parse_timestamp, utc_now};
