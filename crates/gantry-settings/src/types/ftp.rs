//! FTP front end settings.

use serde::{Deserialize, Serialize};

/// FTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FtpSettings {
    /// Whether the FTP front end is started.
    pub enabled: bool,
    /// Bind address for the control channel.
    pub host: String,
    /// Control channel port.
    pub port: u16,
    /// Address advertised in `PASV` replies. Defaults to the control
    /// connection's local address when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passive_host: Option<String>,
    /// Lines of the `220` greeting.
    pub greeting: Vec<String>,
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 2121,
            passive_host: None,
            greeting: vec![
                "Gantry".to_string(),
                "Welcome to the Gantry FTP server".to_string(),
            ],
        }
    }
}
