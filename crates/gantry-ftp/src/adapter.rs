//! Filesystem contract for the FTP front end, backed by agent round trips.
//!
//! No file content is ever stored: stat and list are answered from a
//! [`MemTree`] built from one listing reply and dropped afterwards, and every
//! content or mutation operation is refused.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gantry_core::ids::AccountId;
use gantry_core::protocol::{AgentMessage, FileEntry, MessageKind, file_data_error};
use gantry_server::AgentConnection;
use gantry_server::agent::correlator::CorrelationError;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::path::PathScope;
use crate::tree::{MemTree, NodeKind, base_name};

/// Failure of a filesystem operation, reported to the FTP client.
#[derive(Debug, Error)]
pub enum FsError {
    /// The operation is not supported through an agent.
    #[error("You are not permitted to do this!")]
    NotPermitted,
    /// The path does not exist.
    #[error("No such file or directory: {0}")]
    NotFound(String),
    /// The path is a file where a directory is required.
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    /// The agent answered with an error.
    #[error("{0}")]
    Agent(String),
    /// The round trip to the agent failed.
    #[error(transparent)]
    Request(#[from] CorrelationError),
}

impl FsError {
    /// FTP reply code for this error.
    pub fn reply_code(&self) -> u16 {
        match self {
            Self::Request(CorrelationError::ConnectionClosed) => 421,
            Self::Request(CorrelationError::AlreadyPending(_)) => 450,
            Self::Request(CorrelationError::TimedOut { .. }) => 451,
            Self::NotPermitted | Self::NotFound(_) | Self::NotADirectory(_) | Self::Agent(_) => {
                550
            }
        }
    }
}

/// Type of a filesystem entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Directory.
    Directory,
    /// Regular file.
    File,
}

/// Synthetic metadata for one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// Entry name (last path segment).
    pub name: String,
    /// Entry type.
    pub kind: FileKind,
    /// Size in bytes; zero when the agent did not report one.
    pub size: u64,
}

impl FileStat {
    fn from_node(name: &str, kind: NodeKind) -> Self {
        match kind {
            NodeKind::Directory => Self {
                name: name.to_owned(),
                kind: FileKind::Directory,
                size: 0,
            },
            NodeKind::File { size } => Self {
                name: name.to_owned(),
                kind: FileKind::File,
                size: size.unwrap_or(0),
            },
        }
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Operations an FTP session performs on a filesystem.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Working directory in display form.
    fn current_directory(&self) -> &str;

    /// Stat one path.
    async fn get(&self, path: &str) -> Result<FileStat, FsError>;

    /// Entries of the directory at `path`.
    async fn list(&self, path: &str) -> Result<Vec<FileStat>, FsError>;

    /// Change the working directory; returns the new one.
    async fn chdir(&mut self, path: &str) -> Result<String, FsError>;

    /// Read file content.
    async fn read(&self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Write file content.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), FsError>;

    /// Delete a file or directory.
    async fn delete(&self, path: &str) -> Result<(), FsError>;

    /// Create a directory.
    async fn mkdir(&self, path: &str) -> Result<(), FsError>;

    /// Rename `from` to `to`.
    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// Change permission bits.
    async fn chmod(&self, path: &str, mode: &str) -> Result<(), FsError>;

    /// A fresh name for `STOU`-style uploads.
    fn unique_name(&self, hint: &str) -> String;
}

/// One agent's filesystem as seen by one FTP session.
pub struct AgentFileSystem {
    conn: Arc<AgentConnection>,
    scope: PathScope,
    cwd: String,
    account: Option<AccountId>,
    deadline: Duration,
}

impl AgentFileSystem {
    /// Filesystem of the agent behind `conn`, rooted at `/<server_name>`.
    ///
    /// Every round trip waits at most `deadline` for the reply.
    pub fn new(conn: Arc<AgentConnection>, server_name: &str, deadline: Duration) -> Self {
        let scope = PathScope::new(server_name);
        Self {
            cwd: scope.prefix().to_owned(),
            conn,
            scope,
            account: None,
            deadline,
        }
    }

    /// Attribute requests to `account`.
    #[must_use]
    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    /// Account this session acts for, if any.
    pub fn account(&self) -> Option<&AccountId> {
        self.account.as_ref()
    }

    /// The agent connection behind this filesystem.
    pub fn connection(&self) -> &Arc<AgentConnection> {
        &self.conn
    }

    fn resolve(&self, path: &str) -> String {
        self.scope.resolve(&self.cwd, path)
    }

    async fn round_trip(
        &self,
        message: AgentMessage,
        expected: MessageKind,
    ) -> Result<AgentMessage, FsError> {
        Ok(self
            .conn
            .request_within(&message, expected, self.deadline)
            .await?)
    }

    async fn fetch_listing(&self, agent_path: &str) -> Result<Vec<FileEntry>, FsError> {
        let reply = self
            .round_trip(
                AgentMessage::FetchAllFiles {
                    path: agent_path.to_owned(),
                },
                MessageKind::AllFiles,
            )
            .await?;
        match reply {
            AgentMessage::AllFiles { files } => Ok(files),
            other => Err(FsError::Agent(format!("unexpected {} reply", other.kind()))),
        }
    }

    async fn fetch_metadata(&self, agent_path: &str) -> Result<Value, FsError> {
        let reply = self
            .round_trip(
                AgentMessage::FetchFile {
                    path: agent_path.to_owned(),
                },
                MessageKind::FileData,
            )
            .await?;
        let AgentMessage::FileData { file, .. } = reply else {
            return Err(FsError::Agent(format!("unexpected {} reply", reply.kind())));
        };
        if let Some(error) = file_data_error(&file) {
            return Err(FsError::Agent(error.to_owned()));
        }
        Ok(file)
    }

    fn refuse(&self, operation: &'static str, path: &str) -> FsError {
        debug!(
            agent_id = self.conn.agent_id().as_deref().unwrap_or("-"),
            account_id = self.account.as_deref().unwrap_or("-"),
            operation,
            path,
            "filesystem operation refused"
        );
        FsError::NotPermitted
    }
}

fn metadata_kind(file: &Value) -> NodeKind {
    if file.get("directory").and_then(Value::as_bool) == Some(true) {
        NodeKind::Directory
    } else {
        NodeKind::File {
            size: file.get("size").and_then(Value::as_u64),
        }
    }
}

fn parent_of(agent_path: &str) -> &str {
    match agent_path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

#[async_trait]
impl FileSystem for AgentFileSystem {
    fn current_directory(&self) -> &str {
        &self.cwd
    }

    async fn get(&self, path: &str) -> Result<FileStat, FsError> {
        let display = self.resolve(path);
        let agent_path = self.scope.to_agent(&display);
        if agent_path == "/" {
            return Ok(FileStat::from_node(base_name(&display), NodeKind::Directory));
        }
        let file = self.fetch_metadata(&agent_path).await?;
        let parent = parent_of(&agent_path);
        let entries = self.fetch_listing(parent).await?;
        let tree = MemTree::from_listing(parent, &entries);
        let kind = tree
            .kind(&agent_path)
            .unwrap_or_else(|| metadata_kind(&file));
        Ok(FileStat::from_node(base_name(&agent_path), kind))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileStat>, FsError> {
        let display = self.resolve(path);
        let agent_path = self.scope.to_agent(&display);
        let entries = self.fetch_listing(&agent_path).await?;
        let tree = MemTree::from_listing(&agent_path, &entries);
        let children = tree
            .children(&agent_path)
            .ok_or(FsError::NotADirectory(display))?;
        Ok(children
            .into_iter()
            .map(|(name, kind)| FileStat::from_node(name, kind))
            .collect())
    }

    async fn chdir(&mut self, path: &str) -> Result<String, FsError> {
        let target = self.resolve(path);
        if target != self.scope.prefix() && !self.get(&target).await?.is_dir() {
            return Err(FsError::NotADirectory(target));
        }
        self.cwd = target;
        Ok(self.cwd.clone())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, FsError> {
        Err(self.refuse("read", path))
    }

    async fn write(&self, path: &str, _data: &[u8]) -> Result<(), FsError> {
        Err(self.refuse("write", path))
    }

    async fn delete(&self, path: &str) -> Result<(), FsError> {
        Err(self.refuse("delete", path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        Err(self.refuse("mkdir", path))
    }

    async fn rename(&self, from: &str, _to: &str) -> Result<(), FsError> {
        Err(self.refuse("rename", from))
    }

    async fn chmod(&self, path: &str, _mode: &str) -> Result<(), FsError> {
        Err(self.refuse("chmod", path))
    }

    fn unique_name(&self, _hint: &str) -> String {
        uuid::Uuid::now_v7().simple().to_string()
    }
}
