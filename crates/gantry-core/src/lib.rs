//! # gantry-core
//!
//! Foundation types shared by every Gantry crate:
//!
//! - **Branded IDs**: `AgentId`, `AccountId`, `ConnectionId`, `SessionId`
//! - **Protocol**: the agent control-message enum and frame classification
//! - **Permissions**: per-server capability bits for sub-users
//! - **Directory**: the read-only contract for server/account lookups
//! - **Errors**: `GantryError` taxonomy with stable machine codes
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod constants;
pub mod directory;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod permissions;
pub mod protocol;

pub use directory::{
    AccountRecord, Directory, DirectoryError, DirectorySnapshot, MemoryDirectory, ServerRecord,
    SubUser,
};
pub use errors::GantryError;
pub use ids::{AccountId, AgentId, ConnectionId, SessionId};
pub use permissions::Permissions;
pub use protocol::{AgentMessage, FileEntry, MessageKind};
