//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only needs the fields it changes.

mod ftp;
mod server;

pub use ftp::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "ftp": { "enabled": false }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GantrySettings {
    /// Settings schema version.
    pub version: String,
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Heartbeat and handshake windows.
    pub timing: TimingSettings,
    /// File transfer limits.
    pub transfer: TransferSettings,
    /// FTP front end.
    pub ftp: FtpSettings,
    /// Directory snapshot location.
    pub directory: DirectorySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for GantrySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            timing: TimingSettings::default(),
            transfer: TransferSettings::default(),
            ftp: FtpSettings::default(),
            directory: DirectorySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GantrySettings {
    /// Reject combinations the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.timing.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat interval must be positive".into(),
            ));
        }
        if self.timing.heartbeat_timeout_ms <= self.timing.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "heartbeat timeout must exceed the heartbeat interval".into(),
            ));
        }
        if self.transfer.max_frame_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "max frame size must be positive".into(),
            ));
        }
        if self.server.outbound_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "outbound queue size must be positive".into(),
            ));
        }
        if self.ftp.enabled
            && self.ftp.port != 0
            && self.ftp.port == self.server.port
            && self.ftp.host == self.server.host
        {
            return Err(SettingsError::InvalidValue(
                "ftp and http listeners share an address".into(),
            ));
        }
        Ok(())
    }
}
