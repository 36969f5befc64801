//! # gantry-settings
//!
//! Configuration for the Gantry control plane.
//!
//! Compiled defaults come first, `~/.gantry/settings.json` is laid over
//! them, and `GANTRY_*` environment variables override both. The binary
//! applies its command-line flags last.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, gantry_home, load_settings, load_settings_from_path, overlay,
    resolve_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_protocol_windows() {
        let settings = GantrySettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.timing.heartbeat_interval_ms, 2_000);
        assert_eq!(settings.timing.heartbeat_timeout_ms, 5_000);
        assert_eq!(settings.timing.auth_timeout_ms, 5_000);
        assert_eq!(settings.transfer.timeout_ms, 60_000);
        assert_eq!(settings.transfer.max_frame_bytes, 1024 * 1024);
        assert!(settings.ftp.enabled);
    }
}
