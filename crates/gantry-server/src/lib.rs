//! # gantry-server
//!
//! Control plane for remote agents.
//!
//! - Agent endpoint: handshake, single-owner registry, heartbeat supervision,
//!   message routing, reply correlation, file transfer phases
//! - Subscriber endpoint: session authentication, room fan-out, capability
//!   checks, command relay
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod agent;
pub mod config;
pub mod frame;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod panel;
pub mod server;
pub mod shutdown;

pub use agent::connection::AgentConnection;
pub use agent::correlator::CorrelationError;
pub use config::{ServerConfig, TimingPolicy};
pub use hub::Hub;
pub use server::GantryServer;
