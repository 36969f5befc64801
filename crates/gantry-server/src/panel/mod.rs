//! Subscriber endpoint: sessions, rooms and the request relay.

pub mod commands;
pub mod events;
pub mod handler;
pub mod relay;
pub mod rooms;
pub mod session;
