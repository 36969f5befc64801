//! Server configuration.

use std::time::Duration;

use gantry_core::constants;
use gantry_settings::GantrySettings;

/// Timing and sizing policy injected into the hub.
///
/// Tests shorten these windows and drive them with a paused tokio clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Interval between `PING` frames.
    pub heartbeat_interval: Duration,
    /// Eviction threshold since the last `PONG`.
    pub heartbeat_timeout: Duration,
    /// Window for `LOGIN` after accept.
    pub auth_timeout: Duration,
    /// Window for end-of-transfer after a phase opens; also bounds
    /// correlated requests issued on behalf of subscribers.
    pub transfer_timeout: Duration,
    /// Largest accepted binary frame.
    pub max_binary_frame: usize,
    /// Oversize frames tolerated before a transfer is aborted.
    pub max_frame_violations: u32,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            heartbeat_timeout: constants::HEARTBEAT_TIMEOUT,
            auth_timeout: constants::AUTH_TIMEOUT,
            transfer_timeout: constants::TRANSFER_TIMEOUT,
            max_binary_frame: constants::MAX_BINARY_FRAME,
            max_frame_violations: constants::MAX_FRAME_VIOLATIONS,
        }
    }
}

/// Configuration for the HTTP/WebSocket listener.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent sockets.
    pub max_connections: usize,
    /// Outbound queue depth per socket.
    pub outbound_queue_size: usize,
    /// Wait for tasks on shutdown before aborting them.
    pub shutdown_grace: Duration,
    /// Protocol timing.
    pub timing: TimingPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            outbound_queue_size: constants::OUTBOUND_QUEUE_SIZE,
            shutdown_grace: Duration::from_secs(10),
            timing: TimingPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &GantrySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            outbound_queue_size: settings.server.outbound_queue_size,
            shutdown_grace: settings.server.shutdown_grace(),
            timing: TimingPolicy {
                heartbeat_interval: settings.timing.heartbeat_interval(),
                heartbeat_timeout: settings.timing.heartbeat_timeout(),
                auth_timeout: settings.timing.auth_timeout(),
                transfer_timeout: settings.transfer.timeout(),
                max_binary_frame: settings.transfer.max_frame_bytes,
                max_frame_violations: settings.transfer.max_frame_violations,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_protocol_constants() {
        let p = TimingPolicy::default();
        assert_eq!(p.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(p.heartbeat_timeout, Duration::from_secs(5));
        assert_eq!(p.auth_timeout, Duration::from_secs(5));
        assert_eq!(p.transfer_timeout, Duration::from_secs(60));
        assert_eq!(p.max_binary_frame, 1024 * 1024);
    }

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn from_settings_copies_values() {
        let mut settings = GantrySettings::default();
        settings.server.port = 9000;
        settings.transfer.timeout_ms = 1_500;
        settings.timing.heartbeat_interval_ms = 250;
        settings.server.shutdown_grace_ms = 750;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.timing.transfer_timeout, Duration::from_millis(1_500));
        assert_eq!(cfg.timing.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(cfg.outbound_queue_size, settings.server.outbound_queue_size);
        assert_eq!(cfg.shutdown_grace, Duration::from_millis(750));
    }
}
