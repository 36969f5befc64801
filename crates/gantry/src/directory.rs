//! Directory snapshot loaded from a JSON file.

use std::path::Path;

use anyhow::{Context, Result};
use gantry_core::directory::{DirectorySnapshot, MemoryDirectory};
use tracing::{info, warn};

/// Read the snapshot at `path` into a [`MemoryDirectory`].
///
/// A missing file yields an empty directory, so every login is refused
/// until one is provided.
pub fn load_directory(path: &Path) -> Result<MemoryDirectory> {
    if !path.exists() {
        warn!(path = %path.display(), "directory file not found, no agent or subscriber can log in");
        return Ok(MemoryDirectory::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read directory file: {}", path.display()))?;
    let snapshot: DirectorySnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse directory file: {}", path.display()))?;
    let directory = MemoryDirectory::from_snapshot(snapshot);
    info!(
        path = %path.display(),
        servers = directory.server_count(),
        "directory loaded"
    );
    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::directory::Directory;
    use gantry_core::ids::AgentId;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let directory = load_directory(&dir.path().join("absent.json")).unwrap();
        assert_eq!(directory.server_count(), 0);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_directory(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse directory file"));
    }

    #[tokio::test]
    async fn snapshot_resolves_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        let snapshot = serde_json::json!({
            "servers": [{
                "id": "Lobby1",
                "name": "lobby",
                "owner": "owner",
                "users": [],
                "ftp_password": "hunter2"
            }],
            "server_tokens": {"agent-token": "Lobby1"},
            "accounts": [{"id": "owner", "tag": "owner#1"}],
            "session_tokens": {"owner-session": "owner"}
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let directory = load_directory(&path).unwrap();
        assert_eq!(directory.server_count(), 1);
        let server = directory.server_by_token("agent-token").await.unwrap().unwrap();
        assert_eq!(server.id, AgentId::from("lobby1"));
        assert_eq!(server.ftp_password.as_deref(), Some("hunter2"));
        let account = directory.account_by_token("owner-session").await.unwrap().unwrap();
        assert_eq!(account.tag, "owner#1");
    }
}
