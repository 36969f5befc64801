//! # gantry-ftp
//!
//! FTP front end for connected agents.
//!
//! - [`path`]: working-directory resolution confined to a per-agent prefix
//! - [`tree`]: ephemeral in-memory tree built from one listing reply
//! - [`adapter`]: the [`FileSystem`](adapter::FileSystem) contract and the
//!   agent-backed implementation
//! - [`listing`]: unix-style `LIST` lines
//! - [`server`]: control-channel command loop with passive data connections

#![deny(unsafe_code)]

pub mod adapter;
pub mod listing;
pub mod path;
pub mod server;
pub mod tree;

pub use adapter::{AgentFileSystem, FileKind, FileStat, FileSystem, FsError};
pub use server::{FtpConfig, FtpServer};
