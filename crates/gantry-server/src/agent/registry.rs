//! Single-owner registry of authenticated agent connections.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::errors::AuthFailure;
use gantry_core::ids::AgentId;
use parking_lot::RwLock;

use super::connection::AgentConnection;

/// Map from agent id to its one live connection.
///
/// Every mutation is a single synchronous critical section, so two logical
/// operations for the same id never interleave.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<AgentId, Arc<AgentConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `id`.
    ///
    /// A live entry is never replaced: the new handshake is rejected instead.
    pub fn register(
        &self,
        id: AgentId,
        connection: Arc<AgentConnection>,
    ) -> Result<(), AuthFailure> {
        let mut conns = self.connections.write();
        if let Some(existing) = conns.get(&id) {
            if !existing.is_closed() {
                return Err(AuthFailure::AlreadyOnline);
            }
        }
        let _ = conns.insert(id, connection);
        Ok(())
    }

    /// The live connection for `id`, if any.
    pub fn lookup(&self, id: &AgentId) -> Option<Arc<AgentConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Remove `id` only while it still maps to `connection`.
    ///
    /// Returns whether an entry was removed, so callers emit the offline
    /// transition exactly once. Never blocks on I/O.
    pub fn evict(&self, id: &AgentId, connection: &Arc<AgentConnection>) -> bool {
        let mut conns = self.connections.write();
        if conns
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, connection))
        {
            let _ = conns.remove(id);
            true
        } else {
            false
        }
    }

    /// Whether `id` is registered.
    pub fn is_online(&self, id: &AgentId) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered agents.
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Snapshot of every registered connection.
    pub fn all(&self) -> Vec<Arc<AgentConnection>> {
        self.connections.read().values().cloned().collect()
    }
}
