//! Subscriber session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use gantry_core::directory::AccountRecord;
use gantry_core::ids::{AgentId, SessionId};
use gantry_core::permissions::Permissions;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::events::PanelEvent;
use crate::frame::Frame;

/// Identity bound to a session after `authenticate`.
#[derive(Clone, Debug)]
pub struct SessionIdentity {
    /// Account projection.
    pub account: AccountRecord,
    /// Token the session authenticated with; used to re-validate
    /// privileged actions against the directory.
    pub token: String,
    /// Room memberships and the permissions held in each.
    pub rooms: HashMap<AgentId, Permissions>,
}

impl SessionIdentity {
    /// Whether the session may observe `agent`.
    pub fn is_member(&self, agent: &AgentId) -> bool {
        self.account.admin || self.rooms.contains_key(agent)
    }

    /// Permissions held on `agent`.
    pub fn permissions(&self, agent: &AgentId) -> Permissions {
        if self.account.admin {
            return Permissions::ALL;
        }
        self.rooms.get(agent).copied().unwrap_or(Permissions::NONE)
    }
}

/// One connected subscriber socket.
pub struct PanelSession {
    /// Unique session ID.
    pub id: SessionId,
    /// Send channel to the socket's write task.
    tx: mpsc::Sender<Frame>,
    identity: RwLock<Option<SessionIdentity>>,
    /// Agent currently receiving this session's upload frames.
    upload_target: Mutex<Option<AgentId>>,
    dropped_messages: AtomicU64,
}

impl PanelSession {
    /// Create an unauthenticated session.
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: SessionId::new(),
            tx,
            identity: RwLock::new(None),
            upload_target: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame. Returns `false` if the channel is full or closed.
    pub fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::FRAMES_DROPPED_TOTAL, "peer" => "panel")
                .increment(1);
            false
        }
    }

    /// Serialize and queue an event.
    pub fn send_event(&self, event: &PanelEvent) -> bool {
        event
            .to_json()
            .is_some_and(|json| self.send(Frame::Text(json)))
    }

    /// Queue download bytes.
    pub fn send_binary(&self, data: Bytes) -> bool {
        self.send(Frame::Binary(data))
    }

    /// Total frames dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Bind the authenticated identity, replacing any previous one.
    pub fn bind(&self, identity: SessionIdentity) {
        *self.identity.write() = Some(identity);
    }

    /// The bound identity.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.read().clone()
    }

    /// Whether the session is in `agent`'s room.
    pub fn in_room(&self, agent: &AgentId) -> bool {
        self.identity
            .read()
            .as_ref()
            .is_some_and(|i| i.rooms.contains_key(agent))
    }

    /// Set or clear the upload target.
    pub fn set_upload_target(&self, agent: Option<AgentId>) {
        *self.upload_target.lock() = agent;
    }

    /// Current upload target.
    pub fn upload_target(&self) -> Option<AgentId> {
        self.upload_target.lock().clone()
    }
}
