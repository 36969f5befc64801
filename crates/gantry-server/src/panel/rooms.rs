//! Subscriber sessions and room fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::ids::{AgentId, SessionId};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::events::PanelEvent;
use super::session::PanelSession;
use crate::frame::Frame;

/// Connected subscriber sessions, fanned out by room.
#[derive(Default)]
pub struct SessionHub {
    sessions: RwLock<HashMap<SessionId, Arc<PanelSession>>>,
}

impl SessionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    pub fn add(&self, session: Arc<PanelSession>) {
        let _ = self.sessions.write().insert(session.id.clone(), session);
    }

    /// Remove a session by ID.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<PanelSession>> {
        self.sessions.write().remove(id)
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<PanelSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Number of connected sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Send `event` to every session in `agent`'s room.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn broadcast_to_room(&self, agent: &AgentId, event: &PanelEvent) -> usize {
        let Some(json) = event.to_json() else {
            return 0;
        };
        let sessions = self.sessions.read();
        let mut delivered = 0;
        for session in sessions.values().filter(|s| s.in_room(agent)) {
            if session.send(Frame::Text(json.clone())) {
                delivered += 1;
            } else {
                warn!(session_id = %session.id, agent_id = %agent, "failed to send room event");
            }
        }
        debug!(agent_id = %agent, recipients = delivered, "room broadcast");
        delivered
    }

    /// Send `event` to one session, if it is still connected.
    pub fn send_to(&self, id: &SessionId, event: &PanelEvent) -> bool {
        self.get(id).is_some_and(|s| s.send_event(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::session::SessionIdentity;
    use gantry_core::directory::AccountRecord;
    use gantry_core::ids::AccountId;
    use gantry_core::permissions::Permissions;
    use tokio::sync::mpsc;

    fn session_in(rooms: &[&str]) -> (Arc<PanelSession>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(PanelSession::new(tx));
        session.bind(SessionIdentity {
            account: AccountRecord {
                id: AccountId::from("u"),
                tag: "u#1".into(),
                admin: false,
                suspended: false,
            },
            token: "t".into(),
            rooms: rooms
                .iter()
                .map(|r| (AgentId::from(*r), Permissions::ALL))
                .collect(),
        });
        (session, rx)
    }

    fn offline(agent: &str) -> PanelEvent {
        PanelEvent::Status {
            server: AgentId::from(agent),
            online: false,
        }
    }

    #[test]
    fn broadcast_reaches_only_room_members() {
        let hub = SessionHub::new();
        let (member, mut member_rx) = session_in(&["a"]);
        let (outsider, mut outsider_rx) = session_in(&["b"]);
        hub.add(member);
        hub.add(outsider);

        assert_eq!(hub.broadcast_to_room(&AgentId::from("a"), &offline("a")), 1);
        assert!(member_rx.try_recv().is_ok());
        assert!(outsider_rx.try_recv().is_err());
    }

    #[test]
    fn removed_sessions_get_nothing() {
        let hub = SessionHub::new();
        let (member, mut rx) = session_in(&["a"]);
        let id = member.id.clone();
        hub.add(member);
        assert!(hub.remove(&id).is_some());
        assert_eq!(hub.broadcast_to_room(&AgentId::from("a"), &offline("a")), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.count(), 0);
    }

    #[test]
    fn send_to_single_session() {
        let hub = SessionHub::new();
        let (member, mut rx) = session_in(&[]);
        let id = member.id.clone();
        hub.add(member);
        assert!(hub.send_to(&id, &offline("x")));
        assert!(rx.try_recv().is_ok());
        assert!(!hub.send_to(&SessionId::from("missing"), &offline("x")));
    }
}
