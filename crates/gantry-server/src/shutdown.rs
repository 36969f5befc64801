//! Stopping the control plane.
//!
//! One [`CancellationToken`] fans out to the HTTP listener (which in turn
//! closes the hub and the FTP accept loop). [`ShutdownCoordinator::drain`]
//! then gives the listener tasks the configured grace period to wind down.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the process-wide stop signal and the grace period.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator that waits up to `grace` for tasks to finish.
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Repeated calls do nothing.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Configured grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Trigger shutdown and wait for `tasks`.
    ///
    /// Tasks still running when the grace period ends are aborted; returns
    /// how many were.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) -> usize {
        self.trigger();
        info!(
            tasks = tasks.len(),
            grace_ms = self.grace.as_millis(),
            "draining listeners"
        );

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.grace, join_all(tasks)).await.is_ok() {
            return 0;
        }
        let stuck = aborts.iter().filter(|task| !task.is_finished()).count();
        warn!(stuck, "grace period over, aborting listeners");
        for task in aborts {
            task.abort();
        }
        stuck
    }
}
