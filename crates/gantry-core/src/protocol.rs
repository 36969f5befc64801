//! Agent wire protocol.
//!
//! Every text frame on an agent socket is a JSON object with a `kind`
//! discriminator. Binary frames carry raw file bytes and are only meaningful
//! while a transfer phase is open, so classification here is limited to
//! control messages; binary handling lives with the transfer pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{AgentId, SessionId};

/// One entry of a flat directory listing returned by an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Agent-relative path, e.g. `/plugins` or `/server.jar`.
    pub name: String,
    /// Whether the entry is a directory.
    #[serde(default)]
    pub directory: bool,
    /// Size in bytes when the agent reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Parameters of a download or upload request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Agent-relative path of the file.
    pub path: String,
    /// Replace an existing file (uploads only).
    #[serde(default)]
    pub replace: bool,
    /// Subscriber session that asked for the transfer.
    pub requester: SessionId,
    /// Whether the path is outside the server's sandbox (root access).
    #[serde(default)]
    pub root: bool,
    /// Declared payload size, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Control messages exchanged with an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// Handshake carrying the agent's credential token.
    Login {
        /// Server token issued by the directory.
        token: String,
    },
    /// Handshake outcome.
    LoginStatus {
        /// Whether the agent is now registered.
        ok: bool,
        /// Rejection reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Server id the agent was registered under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server: Option<AgentId>,
    },
    /// Liveness check.
    Ping,
    /// Liveness acknowledgment.
    Pong,
    /// A console log line.
    Console {
        /// The log line.
        #[serde(alias = "log")]
        line: String,
        /// Log level (`INFO`, `WARN`, `ERROR`, `SYSTEM`, ...).
        #[serde(default = "default_level")]
        level: String,
        /// Milliseconds since the epoch.
        #[serde(default)]
        timestamp: i64,
    },
    /// Console history request (no payload) or reply (opaque history blob).
    ConsoleHistory {
        /// History blob, present on replies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        history: Option<Value>,
    },
    /// Request metadata for one path.
    FetchFile {
        /// Agent-relative path.
        path: String,
    },
    /// Metadata for one path, or `{"error": "..."}`.
    ///
    /// Replies to a download request carry the requesting session so they
    /// bypass the correlator and go straight to that subscriber.
    FileData {
        /// File metadata object.
        file: Value,
        /// Session that asked for a download, when this answers one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requester: Option<SessionId>,
    },
    /// Request a flat listing of a subtree.
    FetchAllFiles {
        /// Agent-relative path.
        path: String,
    },
    /// Flat listing of a subtree.
    AllFiles {
        /// Every entry below the requested path.
        files: Vec<FileEntry>,
    },
    /// Download request (core to agent) or stream start (agent to core).
    DownloadFile(TransferRequest),
    /// Upload request; opens the upload phase on the agent.
    UploadFile(TransferRequest),
    /// Console command to execute.
    ExecuteCommand {
        /// Command after built-in rewriting.
        command: String,
        /// Command exactly as the subscriber typed it.
        raw: String,
        /// Display tag of the requesting subscriber.
        requester: String,
    },
    /// Request the online player list.
    GetPlayers,
    /// Online player list.
    PlayerList {
        /// Player objects as reported by the agent.
        players: Vec<Value>,
    },
    /// Closes the current transfer phase.
    EndOfTransfer,
    /// Human-readable error.
    Error {
        /// Error message.
        message: String,
    },
}

fn default_level() -> String {
    "INFO".into()
}

/// Fieldless discriminator of [`AgentMessage`], used to key correlation waiters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// `LOGIN`
    Login,
    /// `LOGIN_STATUS`
    LoginStatus,
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
    /// `CONSOLE`
    Console,
    /// `CONSOLE_HISTORY`
    ConsoleHistory,
    /// `FETCH_FILE`
    FetchFile,
    /// `FILE_DATA`
    FileData,
    /// `FETCH_ALL_FILES`
    FetchAllFiles,
    /// `ALL_FILES`
    AllFiles,
    /// `DOWNLOAD_FILE`
    DownloadFile,
    /// `UPLOAD_FILE`
    UploadFile,
    /// `EXECUTE_COMMAND`
    ExecuteCommand,
    /// `GET_PLAYERS`
    GetPlayers,
    /// `PLAYER_LIST`
    PlayerList,
    /// `END_OF_TRANSFER`
    EndOfTransfer,
    /// `ERROR`
    Error,
}

impl MessageKind {
    /// Every kind, in wire-table order.
    pub const ALL: [Self; 17] = [
        Self::Login,
        Self::LoginStatus,
        Self::Ping,
        Self::Pong,
        Self::Console,
        Self::ConsoleHistory,
        Self::FetchFile,
        Self::FileData,
        Self::FetchAllFiles,
        Self::AllFiles,
        Self::DownloadFile,
        Self::UploadFile,
        Self::ExecuteCommand,
        Self::GetPlayers,
        Self::PlayerList,
        Self::EndOfTransfer,
        Self::Error,
    ];

    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::LoginStatus => "LOGIN_STATUS",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Console => "CONSOLE",
            Self::ConsoleHistory => "CONSOLE_HISTORY",
            Self::FetchFile => "FETCH_FILE",
            Self::FileData => "FILE_DATA",
            Self::FetchAllFiles => "FETCH_ALL_FILES",
            Self::AllFiles => "ALL_FILES",
            Self::DownloadFile => "DOWNLOAD_FILE",
            Self::UploadFile => "UPLOAD_FILE",
            Self::ExecuteCommand => "EXECUTE_COMMAND",
            Self::GetPlayers => "GET_PLAYERS",
            Self::PlayerList => "PLAYER_LIST",
            Self::EndOfTransfer => "END_OF_TRANSFER",
            Self::Error => "ERROR",
        }
    }

    /// Whether an agent may send this kind to the core.
    pub fn agent_may_send(self) -> bool {
        matches!(
            self,
            Self::Login
                | Self::Pong
                | Self::Console
                | Self::ConsoleHistory
                | Self::FileData
                | Self::AllFiles
                | Self::DownloadFile
                | Self::PlayerList
                | Self::EndOfTransfer
                | Self::Error
        )
    }

    /// Whether this kind is accepted before the handshake completes.
    pub fn allowed_before_login(self) -> bool {
        matches!(self, Self::Login | Self::Pong)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolViolation::UnknownKind(s.to_owned()))
    }
}

impl AgentMessage {
    /// Discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Login { .. } => MessageKind::Login,
            Self::LoginStatus { .. } => MessageKind::LoginStatus,
            Self::Ping => MessageKind::Ping,
            Self::Pong => MessageKind::Pong,
            Self::Console { .. } => MessageKind::Console,
            Self::ConsoleHistory { .. } => MessageKind::ConsoleHistory,
            Self::FetchFile { .. } => MessageKind::FetchFile,
            Self::FileData { .. } => MessageKind::FileData,
            Self::FetchAllFiles { .. } => MessageKind::FetchAllFiles,
            Self::AllFiles { .. } => MessageKind::AllFiles,
            Self::DownloadFile(_) => MessageKind::DownloadFile,
            Self::UploadFile(_) => MessageKind::UploadFile,
            Self::ExecuteCommand { .. } => MessageKind::ExecuteCommand,
            Self::GetPlayers => MessageKind::GetPlayers,
            Self::PlayerList { .. } => MessageKind::PlayerList,
            Self::EndOfTransfer => MessageKind::EndOfTransfer,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// Build an `ERROR` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        // Every variant is a plain struct of strings, numbers and values,
        // so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, kind = %self.kind(), "failed to serialize agent message");
            String::new()
        })
    }

    /// Parse a control text frame.
    ///
    /// The frame must be a JSON object with a known string `kind`, and the
    /// payload must match that kind's fields.
    pub fn parse(text: &str) -> Result<Self, ProtocolViolation> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolViolation::MalformedJson(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(ProtocolViolation::NotAnObject);
        };
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ProtocolViolation::MissingKind)?
            .parse::<MessageKind>()?;
        serde_json::from_value(value).map_err(|e| ProtocolViolation::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }
}

/// Returns the error text if a `FILE_DATA` payload reports a failure.
pub fn file_data_error(file: &Value) -> Option<&str> {
    file.get("error").and_then(Value::as_str)
}

/// A frame that breaks the wire contract.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// The text frame is not valid JSON.
    #[error("Invalid JSON provided: {0}")]
    MalformedJson(String),
    /// The JSON value is not an object.
    #[error("control message must be a JSON object")]
    NotAnObject,
    /// The object has no string `kind` field.
    #[error("control message is missing its kind")]
    MissingKind,
    /// The `kind` is not part of the protocol.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    /// The payload does not match the kind's fields.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Kind named by the frame.
        kind: MessageKind,
        /// Deserializer message.
        reason: String,
    },
    /// The kind is valid but not in the current state or direction.
    #[error("{kind} is not allowed here")]
    UnexpectedKind {
        /// Offending kind.
        kind: MessageKind,
    },
    /// A non-handshake message arrived before `LOGIN` succeeded.
    #[error("Not authenticated.")]
    NotAuthenticated,
    /// End-of-transfer arrived while no transfer was open.
    #[error("end of transfer received with no open transfer")]
    NoOpenTransfer,
    /// A binary frame arrived while no transfer was open.
    #[error("binary frame received with no open transfer")]
    UnexpectedBinary,
}
