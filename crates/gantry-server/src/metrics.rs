//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded; a second install
/// fails because a global recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Agent sockets accepted (counter).
pub const AGENT_CONNECTIONS_TOTAL: &str = "agent_connections_total";
/// Agent handshakes (counter, labels: result).
pub const AGENT_LOGINS_TOTAL: &str = "agent_logins_total";
/// Registered agents (gauge).
pub const AGENTS_ONLINE: &str = "agents_online";
/// Registered agents removed (counter, labels: reason).
pub const AGENT_EVICTIONS_TOTAL: &str = "agent_evictions_total";
/// Protocol violations from agents (counter).
pub const AGENT_PROTOCOL_ERRORS_TOTAL: &str = "agent_protocol_errors_total";
/// Connected subscriber sessions (gauge).
pub const PANEL_SESSIONS_ACTIVE: &str = "panel_sessions_active";
/// Subscriber requests (counter, labels: event).
pub const PANEL_REQUESTS_TOTAL: &str = "panel_requests_total";
/// Subscriber requests that failed (counter, labels: code).
pub const PANEL_REQUEST_ERRORS_TOTAL: &str = "panel_request_errors_total";
/// Correlated request round-trip seconds (histogram, labels: kind).
pub const CORRELATED_REQUEST_DURATION_SECONDS: &str = "correlated_request_duration_seconds";
/// Frames dropped on a full outbound queue (counter, labels: peer).
pub const FRAMES_DROPPED_TOTAL: &str = "frames_dropped_total";
/// Transfer phases opened (counter, labels: direction).
pub const TRANSFERS_STARTED_TOTAL: &str = "transfers_started_total";
/// Transfer phases closed by end-of-transfer (counter, labels: direction).
pub const TRANSFERS_COMPLETED_TOTAL: &str = "transfers_completed_total";
/// Transfer phases closed by the timer (counter).
pub const TRANSFERS_TIMED_OUT_TOTAL: &str = "transfers_timed_out_total";
/// Payload bytes relayed (counter, labels: direction).
pub const TRANSFER_BYTES_TOTAL: &str = "transfer_bytes_total";
/// Binary frames over the size cap (counter).
pub const OVERSIZE_FRAMES_TOTAL: &str = "oversize_frames_total";
/// FTP control connections accepted (counter).
pub const FTP_SESSIONS_TOTAL: &str = "ftp_sessions_total";
/// FTP logins (counter, labels: result).
pub const FTP_LOGINS_TOTAL: &str = "ftp_logins_total";
