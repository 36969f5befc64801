//! Read-only contract with the server/account directory.
//!
//! The directory owns server and account documents; the control plane only
//! reads the projections defined here and never writes them back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{AccountId, AgentId};
use crate::permissions::Permissions;

/// A sub-user entry on a server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUser {
    /// Account granted access.
    pub id: AccountId,
    /// Granted permission bits.
    pub permissions: Permissions,
}

/// Projection of a hosted server document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Server id; also the agent id.
    pub id: AgentId,
    /// Display name; also the FTP root prefix.
    pub name: String,
    /// Owning account.
    pub owner: AccountId,
    /// Whether the server is suspended.
    #[serde(default)]
    pub suspended: bool,
    /// Sub-users and their permissions.
    #[serde(default)]
    pub users: Vec<SubUser>,
    /// Password accepted by the FTP front end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp_password: Option<String>,
}

impl ServerRecord {
    /// Whether `account` belongs to this server's room.
    pub fn is_member(&self, account: &AccountId) -> bool {
        self.owner == *account || self.users.iter().any(|u| u.id == *account)
    }

    /// Effective permissions of `account` on this server.
    pub fn permissions_for(&self, account: &AccountId) -> Permissions {
        if self.owner == *account {
            return Permissions::ALL;
        }
        self.users
            .iter()
            .find(|u| u.id == *account)
            .map_or(Permissions::NONE, |u| u.permissions)
    }
}

/// Projection of a subscriber account document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account id.
    pub id: AccountId,
    /// Display tag shown in console lines and announce messages.
    pub tag: String,
    /// Administrators may act on every server.
    #[serde(default)]
    pub admin: bool,
    /// Whether the account is suspended.
    #[serde(default)]
    pub suspended: bool,
}

/// Failure inside the directory collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The backing store could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    /// The backing store returned data that does not fit the projection.
    #[error("directory data is invalid: {0}")]
    Invalid(String),
}

/// Lookups the control plane needs from the directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve an agent's credential token to its server.
    async fn server_by_token(&self, token: &str) -> Result<Option<ServerRecord>, DirectoryError>;

    /// Fetch a server by id.
    async fn server(&self, id: &AgentId) -> Result<Option<ServerRecord>, DirectoryError>;

    /// Resolve a subscriber session token to its account.
    async fn account_by_token(&self, token: &str)
    -> Result<Option<AccountRecord>, DirectoryError>;

    /// Every server the account owns or is a sub-user of.
    async fn servers_for_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<ServerRecord>, DirectoryError>;
}

/// Serializable snapshot of a directory, used by [`MemoryDirectory`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Server documents.
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    /// Agent token to server id.
    #[serde(default)]
    pub server_tokens: HashMap<String, AgentId>,
    /// Account documents.
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    /// Subscriber session token to account id.
    #[serde(default)]
    pub session_tokens: HashMap<String, AccountId>,
}

/// In-memory directory built from a [`DirectorySnapshot`].
///
/// Server ids are stored in their normalized (lowercase) form.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    servers: HashMap<AgentId, ServerRecord>,
    server_tokens: HashMap<String, AgentId>,
    accounts: HashMap<AccountId, AccountRecord>,
    session_tokens: HashMap<String, AccountId>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a snapshot.
    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        let mut dir = Self::new();
        for server in snapshot.servers {
            dir.insert_server(server);
        }
        for account in snapshot.accounts {
            let _ = dir.accounts.insert(account.id.clone(), account);
        }
        dir.server_tokens = snapshot
            .server_tokens
            .into_iter()
            .map(|(token, id)| (token, AgentId::normalized(&id)))
            .collect();
        dir.session_tokens = snapshot.session_tokens;
        dir
    }

    fn insert_server(&mut self, mut server: ServerRecord) -> AgentId {
        server.id = AgentId::normalized(&server.id);
        let id = server.id.clone();
        let _ = self.servers.insert(id.clone(), server);
        id
    }

    /// Add a server reachable with the given agent token.
    #[must_use]
    pub fn with_server(mut self, token: &str, server: ServerRecord) -> Self {
        let id = self.insert_server(server);
        let _ = self.server_tokens.insert(token.to_owned(), id);
        self
    }

    /// Add an account reachable with the given session token.
    #[must_use]
    pub fn with_account(mut self, token: &str, account: AccountRecord) -> Self {
        let _ = self.session_tokens.insert(token.to_owned(), account.id.clone());
        let _ = self.accounts.insert(account.id.clone(), account);
        self
    }

    /// Number of servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn server_by_token(&self, token: &str) -> Result<Option<ServerRecord>, DirectoryError> {
        Ok(self
            .server_tokens
            .get(token)
            .and_then(|id| self.servers.get(id))
            .cloned())
    }

    async fn server(&self, id: &AgentId) -> Result<Option<ServerRecord>, DirectoryError> {
        Ok(self.servers.get(&AgentId::normalized(id)).cloned())
    }

    async fn account_by_token(
        &self,
        token: &str,
    ) -> Result<Option<AccountRecord>, DirectoryError> {
        Ok(self
            .session_tokens
            .get(token)
            .and_then(|id| self.accounts.get(id))
            .cloned())
    }

    async fn servers_for_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<ServerRecord>, DirectoryError> {
        let mut servers: Vec<ServerRecord> = self
            .servers
            .values()
            .filter(|s| s.is_member(account))
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }
}
