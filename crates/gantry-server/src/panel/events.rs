//! Subscriber wire format.
//!
//! Text frames are `{"event": "<name>", "data": {...}}` in both directions.
//! Binary frames carry upload payload inbound and download payload outbound.

use gantry_core::errors::GantryError;
use gantry_core::ids::{AccountId, AgentId};
use gantry_core::protocol::FileEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a subscriber may send.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PanelRequest {
    /// Authenticate with a session token.
    #[serde(rename = "authenticate")]
    Authenticate {
        /// Subscriber session token.
        #[serde(default)]
        token: String,
    },
    /// Request the console backlog.
    #[serde(rename = "fetch log history")]
    FetchLogHistory {
        /// Target server.
        server: String,
    },
    /// Run a console command.
    #[serde(rename = "execute command")]
    ExecuteCommand {
        /// Target server.
        server: String,
        /// Command as typed.
        command: String,
    },
    /// Request metadata for one path.
    #[serde(rename = "get files")]
    GetFiles {
        /// Target server.
        server: String,
        /// Agent-relative path.
        path: String,
    },
    /// Request a flat listing of a subtree.
    #[serde(rename = "get all files")]
    GetAllFiles {
        /// Target server.
        server: String,
        /// Agent-relative path.
        #[serde(default = "root_path")]
        path: String,
    },
    /// Request the online player list.
    #[serde(rename = "get players")]
    GetPlayers {
        /// Target server.
        server: String,
    },
    /// Start a download.
    #[serde(rename = "download file")]
    DownloadFile {
        /// Target server.
        server: String,
        /// Agent-relative path.
        path: String,
        /// Address the whole filesystem.
        #[serde(default)]
        root: bool,
    },
    /// Start an upload; binary frames follow.
    #[serde(rename = "upload file")]
    UploadFile {
        /// Target server.
        server: String,
        /// Agent-relative path.
        path: String,
        /// Replace an existing file.
        #[serde(default)]
        replace: bool,
        /// Declared payload size.
        #[serde(default)]
        size: Option<u64>,
        /// Address the whole filesystem.
        #[serde(default)]
        root: bool,
    },
    /// Close the upload phase.
    #[serde(rename = "end of transfer")]
    EndOfTransfer {
        /// Target server.
        server: String,
    },
}

fn root_path() -> String {
    "/".into()
}

impl PanelRequest {
    /// Parse a subscriber text frame.
    pub fn parse(text: &str) -> Result<Self, GantryError> {
        serde_json::from_str(text).map_err(|e| GantryError::invalid(format!("invalid request: {e}")))
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::FetchLogHistory { .. } => "fetch log history",
            Self::ExecuteCommand { .. } => "execute command",
            Self::GetFiles { .. } => "get files",
            Self::GetAllFiles { .. } => "get all files",
            Self::GetPlayers { .. } => "get players",
            Self::DownloadFile { .. } => "download file",
            Self::UploadFile { .. } => "upload file",
            Self::EndOfTransfer { .. } => "end of transfer",
        }
    }

    /// Server named by the request, as sent.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Authenticate { .. } => None,
            Self::FetchLogHistory { server }
            | Self::ExecuteCommand { server, .. }
            | Self::GetFiles { server, .. }
            | Self::GetAllFiles { server, .. }
            | Self::GetPlayers { server }
            | Self::DownloadFile { server, .. }
            | Self::UploadFile { server, .. }
            | Self::EndOfTransfer { server } => Some(server),
        }
    }

    /// Whether handling waits on an agent reply.
    pub fn is_correlated(&self) -> bool {
        matches!(
            self,
            Self::FetchLogHistory { .. }
                | Self::GetFiles { .. }
                | Self::GetAllFiles { .. }
                | Self::GetPlayers { .. }
        )
    }
}

/// A server visible to an authenticated subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    /// Server id.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Whether its agent is connected.
    pub online: bool,
}

/// One console line as shown to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    /// Log line.
    pub line: String,
    /// Log level.
    pub level: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl ConsoleLine {
    /// A line stamped with the current time.
    pub fn now(line: impl Into<String>, level: &str) -> Self {
        Self {
            line: line.into(),
            level: level.to_owned(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Events sent to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum PanelEvent {
    /// Authentication succeeded.
    #[serde(rename = "authenticated")]
    Authenticated {
        /// Account id.
        id: AccountId,
        /// Display tag.
        tag: String,
        /// Administrator flag.
        admin: bool,
        /// Servers in the session's rooms.
        servers: Vec<ServerSummary>,
    },
    /// A request failed.
    #[serde(rename = "error")]
    Error {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
        /// Server the failure concerns, when the request named one the
        /// subscriber may see.
        #[serde(skip_serializing_if = "Option::is_none")]
        server: Option<AgentId>,
    },
    /// A live console line.
    #[serde(rename = "console")]
    Console {
        /// Source server.
        server: AgentId,
        /// The line.
        #[serde(flatten)]
        line: ConsoleLine,
    },
    /// Console backlog.
    #[serde(rename = "log history")]
    LogHistory {
        /// Source server.
        server: AgentId,
        /// History blob as reported by the agent.
        logs: Value,
    },
    /// Metadata for one path, or an error object.
    #[serde(rename = "file data")]
    FileData {
        /// Source server.
        server: AgentId,
        /// Metadata object.
        file: Value,
    },
    /// Flat listing of a subtree.
    #[serde(rename = "all files")]
    AllFiles {
        /// Source server.
        server: AgentId,
        /// Requested path.
        path: String,
        /// Entries.
        files: Vec<FileEntry>,
    },
    /// Online players.
    #[serde(rename = "players")]
    Players {
        /// Source server.
        server: AgentId,
        /// Player objects.
        players: Vec<Value>,
    },
    /// A download stream opened; binary frames follow.
    #[serde(rename = "download started")]
    DownloadStarted {
        /// Source server.
        server: AgentId,
        /// File path.
        path: String,
        /// Declared size.
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
    /// The agent is ready for upload frames.
    #[serde(rename = "upload ready")]
    UploadReady {
        /// Target server.
        server: AgentId,
        /// File path.
        path: String,
    },
    /// A transfer phase closed normally.
    #[serde(rename = "transfer complete")]
    TransferComplete {
        /// Server.
        server: AgentId,
        /// File path.
        path: String,
        /// Bytes moved.
        bytes: u64,
    },
    /// Agent online/offline transition.
    #[serde(rename = "status")]
    Status {
        /// Server.
        server: AgentId,
        /// New state.
        online: bool,
    },
}

impl PanelEvent {
    /// Error event for `err`.
    pub fn error(err: &GantryError, server: Option<AgentId>) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            server,
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize panel event");
                None
            }
        }
    }
}
