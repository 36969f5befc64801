//! Network, timing, transfer, directory and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listener port for `/agent`, `/panel`, `/health` and `/metrics`.
    pub port: u16,
    /// Maximum number of concurrent sockets (agents plus subscribers).
    pub max_connections: usize,
    /// Outbound queue depth per socket.
    pub outbound_queue_size: usize,
    /// How long shutdown waits for listeners and sockets before aborting
    /// them, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 10_000,
            outbound_queue_size: 256,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ServerSettings {
    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Liveness and handshake windows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingSettings {
    /// Interval between `PING` frames, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Eviction threshold since the last `PONG`, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Window for an agent to complete `LOGIN`, in milliseconds.
    pub auth_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            heartbeat_timeout_ms: 5_000,
            auth_timeout_ms: 5_000,
        }
    }
}

impl TimingSettings {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Authentication window as a [`Duration`].
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

/// File transfer limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferSettings {
    /// Window for end-of-transfer after a phase opens, in milliseconds.
    pub timeout_ms: u64,
    /// Largest accepted binary frame, in bytes.
    pub max_frame_bytes: usize,
    /// Oversize frames tolerated before the transfer is aborted.
    pub max_frame_violations: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_frame_bytes: 1024 * 1024,
            max_frame_violations: 1,
        }
    }
}

impl TransferSettings {
    /// Transfer window as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the JSON directory snapshot lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// Path to the directory file (relative paths resolve against `~/.gantry`).
    pub path: String,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            path: "directory.json".to_string(),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_defaults_match_protocol() {
        let t = TimingSettings::default();
        assert_eq!(t.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(t.heartbeat_timeout(), Duration::from_secs(5));
        assert_eq!(t.auth_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn transfer_defaults() {
        let t = TransferSettings::default();
        assert_eq!(t.timeout(), Duration::from_secs(60));
        assert_eq!(t.max_frame_bytes, 1_048_576);
        assert_eq!(t.max_frame_violations, 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: ServerSettings = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(s.port, 9000);
        assert_eq!(s.host, "0.0.0.0");
    }

    #[test]
    fn log_format_lowercase() {
        let f: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(f, LogFormat::Json);
    }
}
