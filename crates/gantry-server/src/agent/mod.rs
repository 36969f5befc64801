//! Agent endpoint: connection state, registry, heartbeat, routing,
//! correlation and the transfer pipeline.

pub mod connection;
pub mod correlator;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod router;
pub mod transfer;
