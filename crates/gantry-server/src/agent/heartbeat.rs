//! Heartbeat `PING`/`PONG` liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use gantry_core::errors::{GantryError, TimeoutKind};
use gantry_core::protocol::AgentMessage;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::connection::AgentConnection;
use crate::hub::Hub;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The agent stopped acknowledging within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run the heartbeat pings for a connection.
///
/// At each `interval` tick the time since the last `PONG` is checked: past
/// `timeout` the loop returns [`HeartbeatResult::TimedOut`], otherwise a
/// `PING` is sent. The first tick happens one interval after start.
pub async fn run_heartbeat(
    connection: Arc<AgentConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = time::interval_at(time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if connection.last_pong_elapsed() > timeout {
                    return HeartbeatResult::TimedOut;
                }
                let _ = connection.send_message(&AgentMessage::Ping);
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

/// Spawn the supervisor for an authenticated connection.
///
/// On timeout the hub closes the agent with a liveness error, evicts it and
/// broadcasts the offline transition.
pub fn spawn_supervisor(hub: Arc<Hub>, connection: Arc<AgentConnection>) {
    let policy = hub.policy().clone();
    let cancel = connection.cancel_token();
    drop(tokio::spawn(async move {
        let result = run_heartbeat(
            connection.clone(),
            policy.heartbeat_interval,
            policy.heartbeat_timeout,
            cancel,
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(
                conn_id = %connection.id,
                elapsed_ms = connection.last_pong_elapsed().as_millis(),
                "agent missed heartbeat window"
            );
            hub.fail_agent(&connection, GantryError::Timeout(TimeoutKind::Liveness));
        }
    }));
}
