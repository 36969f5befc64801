//! # gantry
//!
//! Gantry control plane binary: loads settings and the directory, then runs
//! the WebSocket server and the FTP front end until interrupted.

#![deny(unsafe_code)]

mod directory;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gantry_ftp::{FtpConfig, FtpServer};
use gantry_server::{GantryServer, ServerConfig};
use gantry_settings::{GantrySettings, LogFormat};
use tracing::{info, warn};

/// Gantry control plane.
#[derive(Parser, Debug)]
#[command(name = "gantry", about = "Gantry agent control plane")]
struct Cli {
    /// Settings file (defaults to `~/.gantry/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// FTP control port (overrides settings).
    #[arg(long)]
    ftp_port: Option<u16>,

    /// Do not start the FTP front end.
    #[arg(long)]
    no_ftp: bool,

    /// Directory snapshot file (overrides settings).
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut GantrySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(port) = self.ftp_port {
            settings.ftp.port = port;
        }
        if self.no_ftp {
            settings.ftp.enabled = false;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }

    fn directory_path(&self, settings: &GantrySettings) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| gantry_settings::resolve_path(&settings.directory.path))
    }
}

fn load(cli: &Cli) -> Result<GantrySettings> {
    let mut settings = match &cli.settings {
        Some(path) => gantry_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => gantry_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings
        .validate()
        .context("Invalid settings after command-line overrides")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    match settings.logging.format {
        LogFormat::Compact => gantry_core::logging::init_subscriber(&settings.logging.level),
        LogFormat::Json => gantry_core::logging::init_json_subscriber(&settings.logging.level),
    }

    let directory = directory::load_directory(&cli.directory_path(&settings))?;

    let mut server = GantryServer::new(ServerConfig::from_settings(&settings), Arc::new(directory));
    match gantry_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let (addr, http_handle) = server
        .listen()
        .await
        .context("Failed to bind the websocket listener")?;
    let mut handles = vec![http_handle];

    if settings.ftp.enabled {
        let ftp = FtpServer::new(FtpConfig::from_settings(&settings), server.hub().clone());
        let (ftp_addr, ftp_handle) = ftp
            .listen()
            .await
            .context("Failed to bind the ftp listener")?;
        info!(addr = %ftp_addr, "ftp front end ready");
        handles.push(ftp_handle);
    }

    info!(addr = %addr, version = env!("CARGO_PKG_VERSION"), "gantry started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    let aborted = server.shutdown().drain(handles).await;
    info!(aborted, "gantry stopped");
    Ok(())
}
