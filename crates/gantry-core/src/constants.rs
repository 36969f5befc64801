//! Protocol timing and sizing defaults.

use std::time::Duration;

/// Interval between liveness pings sent to an agent.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// An agent with no liveness-ack inside this window is evicted.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// An agent socket must complete `LOGIN` within this window.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// A transfer phase must see end-of-transfer within this window.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard cap on a single binary frame during a transfer (1 MiB).
pub const MAX_BINARY_FRAME: usize = 1024 * 1024;

/// Oversize frames tolerated on one transfer before it is aborted.
pub const MAX_FRAME_VIOLATIONS: u32 = 1;

/// Outbound queue depth per socket.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Directory names that are never surfaced to file-transfer clients.
pub const HIDDEN_PREFIXES: &[&str] = &["/__resources"];
