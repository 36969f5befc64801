//! Reading `settings.json` and `GANTRY_*` variables into [`GantrySettings`].
//!
//! The file only needs the keys an operator wants to change: it is laid over
//! the serialized defaults key by key before deserializing, so a partial
//! `{"ftp": {"port": 21}}` keeps every other default. Environment variables
//! win over the file. Malformed variables are logged and skipped rather than
//! failing startup; a malformed file is an error.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{GantrySettings, LogFormat};

/// Base directory for Gantry state (`~/.gantry`).
pub fn gantry_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gantry")
}

/// Resolve the path to the settings file (`~/.gantry/settings.json`).
pub fn settings_path() -> PathBuf {
    gantry_home().join("settings.json")
}

/// Resolve a possibly relative path against `~/.gantry`.
pub fn resolve_path(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        gantry_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GantrySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<GantrySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<GantrySettings> {
    let mut merged = serde_json::to_value(GantrySettings::default())?;
    if path.exists() {
        debug!(?path, "reading settings file");
        let file: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        overlay(&mut merged, file);
    } else {
        debug!(?path, "no settings file, keeping defaults");
    }
    Ok(serde_json::from_value(merged)?)
}

/// Lay `file` over `base` in place.
///
/// Nested objects are combined key by key; any other value in `file`
/// replaces the one in `base`, except `null`, which leaves it untouched.
pub fn overlay(base: &mut Value, file: Value) {
    match (base, file) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(file)) => {
            for (key, value) in file {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `GANTRY_*` overrides read through `lookup`.
///
/// Numbers outside their accepted range and unrecognised booleans or log
/// formats are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut GantrySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.text("GANTRY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.number("GANTRY_PORT", 1..=u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.number("GANTRY_MAX_CONNECTIONS", 1..=1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.number("GANTRY_OUTBOUND_QUEUE", 1..=65_536) {
        settings.server.outbound_queue_size = v;
    }
    if let Some(v) = env.number("GANTRY_SHUTDOWN_GRACE_MS", 0..=600_000) {
        settings.server.shutdown_grace_ms = v;
    }

    if let Some(v) = env.number("GANTRY_HEARTBEAT_INTERVAL_MS", 100..=600_000) {
        settings.timing.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.number("GANTRY_HEARTBEAT_TIMEOUT_MS", 100..=3_600_000) {
        settings.timing.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.number("GANTRY_AUTH_TIMEOUT_MS", 100..=600_000) {
        settings.timing.auth_timeout_ms = v;
    }
    if let Some(v) = env.number("GANTRY_TRANSFER_TIMEOUT_MS", 1_000..=3_600_000) {
        settings.transfer.timeout_ms = v;
    }
    if let Some(v) = env.number("GANTRY_MAX_FRAME_BYTES", 1024..=64 * 1024 * 1024) {
        settings.transfer.max_frame_bytes = v;
    }

    if let Some(v) = env.switch("GANTRY_FTP_ENABLED") {
        settings.ftp.enabled = v;
    }
    if let Some(v) = env.text("GANTRY_FTP_HOST") {
        settings.ftp.host = v;
    }
    if let Some(v) = env.number("GANTRY_FTP_PORT", 1..=u16::MAX) {
        settings.ftp.port = v;
    }
    if let Some(v) = env.text("GANTRY_FTP_PASSIVE_HOST") {
        settings.ftp.passive_host = Some(v);
    }

    if let Some(v) = env.text("GANTRY_DIRECTORY") {
        settings.directory.path = v;
    }
    if let Some(v) = env.text("GANTRY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.text("GANTRY_LOG_FORMAT") {
        match v.to_ascii_lowercase().as_str() {
            "json" => settings.logging.format = LogFormat::Json,
            "compact" => settings.logging.format = LogFormat::Compact,
            _ => warn!(key = "GANTRY_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

/// `on`/`off` style switch value (`true`, `1`, `yes`, `on` and their
/// opposites, any case).
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `raw` as a number inside `range`.
pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn switch(&self, key: &str) -> Option<bool> {
        let raw = (self.lookup)(key)?;
        let parsed = parse_switch(&raw);
        if parsed.is_none() {
            warn!(key, value = %raw, "expected on/off, ignoring");
        }
        parsed
    }

    fn number<T>(&self, key: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd + std::fmt::Display,
    {
        let raw = (self.lookup)(key)?;
        let (min, max) = (range.start().to_string(), range.end().to_string());
        let parsed = parse_in_range(&raw, range);
        if parsed.is_none() {
            warn!(key, value = %raw, %min, %max, "number out of range, ignoring");
        }
        parsed
    }
}
