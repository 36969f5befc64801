//! Error taxonomy shared by the agent and subscriber paths.
//!
//! Every rejection path produces a [`GantryError`]; its [`code`] is the
//! machine-readable string sent to subscribers and its `Display` text is the
//! human-readable message sent to agents and subscribers alike.
//!
//! [`code`]: GantryError::code

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::protocol::ProtocolViolation;

/// Malformed frame, missing field, or message invalid for the current state.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// Handshake rejected.
pub const AUTH_FAILED: &str = "AUTH_FAILED";
/// Capability check failed.
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
/// Liveness, authentication or transfer window expired.
pub const TIMEOUT: &str = "TIMEOUT";
/// Binary frame over the size cap.
pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
/// A transfer is already open on the connection.
pub const TRANSFER_BUSY: &str = "TRANSFER_BUSY";
/// The directory collaborator failed.
pub const DIRECTORY_ERROR: &str = "DIRECTORY_ERROR";
/// The target agent is not connected.
pub const SERVER_OFFLINE: &str = "SERVER_OFFLINE";
/// The subscriber request is missing fields or names an unknown event.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// The agent went away while a reply was pending.
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";
/// A frame could not be queued to a peer that is not keeping up.
pub const UNDELIVERED: &str = "UNDELIVERED";

/// Why a handshake was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// No credential was supplied.
    #[error("no token provided")]
    MissingToken,
    /// The credential does not match any known server or account.
    #[error("invalid token")]
    InvalidToken,
    /// The server or account is suspended.
    #[error("this server is suspended")]
    Suspended,
    /// An agent for this server is already registered.
    #[error("this server is already online and managed")]
    AlreadyOnline,
    /// A subscriber tried to act before authenticating.
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Which window expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No liveness-ack inside the heartbeat window.
    Liveness,
    /// No `LOGIN` inside the authentication window.
    Authentication,
    /// No end-of-transfer inside the transfer window.
    Transfer,
}

/// Top-level error for the control plane.
#[derive(Debug, Error)]
pub enum GantryError {
    /// Wire contract broken; the offending connection is terminated.
    #[error("{0}")]
    Protocol(#[from] ProtocolViolation),

    /// Handshake rejected; the connection never enters the registry.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthFailure),

    /// Capability check failed. The message never mentions agent state.
    #[error("You are not authorized to do that!")]
    Permission,

    /// A timing window expired.
    #[error("{}", timeout_message(.0))]
    Timeout(TimeoutKind),

    /// Binary frame over the size cap; the frame is dropped.
    #[error("binary frame of {size} bytes exceeds the {limit} byte limit")]
    Capacity {
        /// Frame size in bytes.
        size: usize,
        /// Configured cap in bytes.
        limit: usize,
    },

    /// A transfer is already open on this connection.
    #[error("a file transfer is already in progress for this server")]
    TransferBusy,

    /// The directory collaborator failed.
    #[error("directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    /// The target agent is not connected.
    #[error("Server is currently offline!")]
    Offline,

    /// The agent disconnected before replying.
    #[error("connection to the server was closed")]
    ConnectionClosed,

    /// The subscriber request is malformed.
    #[error("{0}")]
    InvalidRequest(String),

    /// A frame was dropped on a full outbound queue; the request or
    /// transfer it belonged to did not go through.
    #[error("{0} could not be delivered")]
    Undelivered(&'static str),
}

fn timeout_message(kind: &TimeoutKind) -> &'static str {
    match kind {
        TimeoutKind::Liveness => "No PONG packet received within the heartbeat window!",
        TimeoutKind::Authentication => "No authentication passed!",
        TimeoutKind::Transfer => "File transfer timed out!",
    }
}

impl GantryError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) => PROTOCOL_ERROR,
            Self::Auth(_) => AUTH_FAILED,
            Self::Permission => PERMISSION_DENIED,
            Self::Timeout(_) => TIMEOUT,
            Self::Capacity { .. } => CAPACITY_EXCEEDED,
            Self::TransferBusy => TRANSFER_BUSY,
            Self::Directory(_) => DIRECTORY_ERROR,
            Self::Offline => SERVER_OFFLINE,
            Self::ConnectionClosed => CONNECTION_CLOSED,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::Undelivered(_) => UNDELIVERED,
        }
    }

    /// Whether an agent connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Auth(_) | Self::Timeout(_))
    }

    /// Shorthand for an invalid subscriber request.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
