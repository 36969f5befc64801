//! `GantryServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use gantry_core::directory::Directory;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::handler::run_agent_connection;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::panel::handler::run_panel_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Agent registry, subscriber sessions and directory.
    pub hub: Arc<Hub>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Socket cap across both endpoints.
    pub max_connections: usize,
}

/// The control plane's HTTP server.
pub struct GantryServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl GantryServer {
    /// Create a server backed by `directory`.
    pub fn new(config: ServerConfig, directory: Arc<dyn Directory>) -> Self {
        let hub = Arc::new(Hub::new(directory, &config));
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_grace));
        Self {
            config,
            hub,
            shutdown,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            metrics: self.metrics.clone(),
            max_connections: self.config.max_connections,
        };

        Router::new()
            .route("/agent", get(agent_ws_handler))
            .route("/panel", get(panel_ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "gantry server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let hub = self.hub.clone();
        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                hub.shutdown();
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                warn!(error = %e, "http server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// The shared hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn at_capacity(state: &AppState) -> bool {
    state.hub.registry().count() + state.hub.sessions().count() >= state.max_connections
}

/// GET /agent: WebSocket upgrade for agents.
async fn agent_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if at_capacity(&state) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let hub = state.hub;
    ws.on_upgrade(move |socket| run_agent_connection(socket, hub))
}

/// GET /panel: WebSocket upgrade for subscribers.
async fn panel_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if at_capacity(&state) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let hub = state.hub;
    ws.on_upgrade(move |socket| run_panel_session(socket, hub))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let hub = &state.hub;
    Json(health::health_check(
        hub.start_time(),
        hub.registry().count(),
        hub.sessions().count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => crate::metrics::render(&handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
