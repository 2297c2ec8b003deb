//! Worker-side heartbeat that keeps the activity marker fresh

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::marker::touch_activity;

/// Background task touching a task's activity marker on an interval
///
/// The first touch happens immediately. Dropping the handle stops the task.
pub struct Heartbeat {
    task_id: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start beating for `task_id` every `interval`
    pub fn spawn(task_id: impl Into<String>, base_dir: impl Into<PathBuf>, interval: Duration) -> Self {
        let task_id = task_id.into();
        let base_dir = base_dir.into();
        debug!(%task_id, ?interval, "Heartbeat::spawn: called");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let beat_id = task_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !touch_activity(&beat_id, &base_dir) {
                            warn!(task_id = %beat_id, "Heartbeat failed to touch activity marker");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!(task_id = %beat_id, "Heartbeat: shutdown received");
                        break;
                    }
                }
            }
        });

        info!(%task_id, interval_secs = interval.as_secs(), "Heartbeat started");
        Self {
            task_id,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Task this heartbeat belongs to
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Stop beating and wait for the background task to finish
    pub async fn stop(mut self) {
        debug!(task_id = %self.task_id, "Heartbeat::stop: called");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(task_id = %self.task_id, "Heartbeat task ended abnormally: {}", e);
        }
        info!(task_id = %self.task_id, "Heartbeat stopped");
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
