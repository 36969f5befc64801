//! Shared control-plane state.
//!
//! The hub owns the agent registry, the subscriber sessions, the directory
//! handle and the timing policy. Every agent connection is destroyed through
//! [`Hub::disconnect_agent`], which is where eviction and the offline
//! broadcast happen.

use std::sync::Arc;
use std::time::Instant;

use gantry_core::directory::{Directory, ServerRecord};
use gantry_core::errors::{AuthFailure, GantryError, TimeoutKind};
use gantry_core::ids::AgentId;
use gantry_core::protocol::{AgentMessage, MessageKind, ProtocolViolation};
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::connection::AgentConnection;
use crate::agent::heartbeat;
use crate::agent::registry::ConnectionRegistry;
use crate::agent::transfer::{PendingTransfer, TransferDirection};
use crate::config::{ServerConfig, TimingPolicy};
use crate::frame::CLOSE_POLICY;
use crate::metrics::{
    AGENT_EVICTIONS_TOTAL, AGENT_LOGINS_TOTAL, AGENTS_ONLINE, PANEL_SESSIONS_ACTIVE,
};
use crate::panel::events::{ConsoleLine, PanelEvent};
use crate::panel::rooms::SessionHub;
use crate::panel::session::PanelSession;

/// Room error sent when an agent misses its heartbeat window.
pub const LIVENESS_TIMEOUT_MESSAGE: &str = "Connection to server timed out!";

/// Shared state behind every socket handler.
pub struct Hub {
    registry: ConnectionRegistry,
    sessions: SessionHub,
    directory: Arc<dyn Directory>,
    policy: TimingPolicy,
    outbound_queue_size: usize,
    closing: CancellationToken,
    start_time: Instant,
}

impl Hub {
    /// Create a hub over `directory`.
    pub fn new(directory: Arc<dyn Directory>, config: &ServerConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            sessions: SessionHub::new(),
            directory,
            policy: config.timing.clone(),
            outbound_queue_size: config.outbound_queue_size,
            closing: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// Timing and sizing policy.
    pub fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    /// Outbound queue depth for new sockets.
    pub fn outbound_queue_size(&self) -> usize {
        self.outbound_queue_size
    }

    /// Registered agents.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Connected subscriber sessions.
    pub fn sessions(&self) -> &SessionHub {
        &self.sessions
    }

    /// Directory collaborator.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// When the hub was created.
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Token cancelled when the server shuts down.
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// The live connection for `id`.
    pub fn agent(&self, id: &AgentId) -> Option<Arc<AgentConnection>> {
        self.registry.lookup(id)
    }

    /// Complete an agent handshake.
    ///
    /// On success the connection is registered, told its server id, the room
    /// is told the server is online and the heartbeat supervisor starts.
    pub async fn login(
        self: &Arc<Self>,
        conn: &Arc<AgentConnection>,
        token: &str,
    ) -> Result<ServerRecord, GantryError> {
        if conn.is_authenticated() {
            return Err(ProtocolViolation::UnexpectedKind {
                kind: MessageKind::Login,
            }
            .into());
        }
        let result = self.admit(conn, token).await;
        let outcome = if result.is_ok() { "ok" } else { "rejected" };
        counter!(AGENT_LOGINS_TOTAL, "result" => outcome).increment(1);
        let record = result?;

        let _ = conn.send_message(&AgentMessage::LoginStatus {
            ok: true,
            reason: None,
            server: Some(record.id.clone()),
        });
        gauge!(AGENTS_ONLINE).set(self.registry.count() as f64);
        let _ = self.sessions.broadcast_to_room(
            &record.id,
            &PanelEvent::Status {
                server: record.id.clone(),
                online: true,
            },
        );
        heartbeat::spawn_supervisor(self.clone(), conn.clone());
        info!(conn_id = %conn.id, agent_id = %record.id, name = %record.name, "agent online");
        Ok(record)
    }

    async fn admit(
        &self,
        conn: &Arc<AgentConnection>,
        token: &str,
    ) -> Result<ServerRecord, GantryError> {
        if token.is_empty() {
            return Err(AuthFailure::MissingToken.into());
        }
        let mut record = self
            .directory
            .server_by_token(token)
            .await?
            .ok_or(AuthFailure::InvalidToken)?;
        if record.suspended {
            return Err(AuthFailure::Suspended.into());
        }
        if conn.is_closed() {
            return Err(GantryError::ConnectionClosed);
        }
        record.id = AgentId::normalized(&record.id);
        self.registry.register(record.id.clone(), conn.clone())?;
        conn.authenticate(record.clone());
        Ok(record)
    }

    /// Report `err` to the agent, close its socket and destroy it.
    ///
    /// Handshake failures are reported as `LOGIN_STATUS {ok: false}`;
    /// everything else as `ERROR`.
    pub fn fail_agent(&self, conn: &Arc<AgentConnection>, err: GantryError) {
        if conn.is_closed() {
            return;
        }
        let message = match &err {
            GantryError::Auth(reason) => AgentMessage::LoginStatus {
                ok: false,
                reason: Some(reason.to_string()),
                server: None,
            },
            other => AgentMessage::error(other.to_string()),
        };
        let _ = conn.send_message(&message);
        let _ = conn.send_close(CLOSE_POLICY, err.code());
        self.disconnect_agent(conn, Some(&err));
    }

    /// Destroy `conn`: cancel its tasks, drop its waiters and transfer, and
    /// evict it from the registry if it is still the registered owner.
    ///
    /// Safe to call more than once; the offline broadcast happens only for
    /// the call that actually evicts.
    pub fn disconnect_agent(&self, conn: &Arc<AgentConnection>, reason: Option<&GantryError>) {
        let agent = conn.agent_id();
        if let Some(open) = conn.shutdown() {
            self.notify_transfer_failed(agent.clone(), &open, &GantryError::ConnectionClosed);
        }
        let Some(agent) = agent else {
            debug!(conn_id = %conn.id, "unauthenticated agent socket closed");
            return;
        };
        if !self.registry.evict(&agent, conn) {
            return;
        }

        let label = reason.map_or("closed", GantryError::code);
        counter!(AGENT_EVICTIONS_TOTAL, "reason" => label).increment(1);
        gauge!(AGENTS_ONLINE).set(self.registry.count() as f64);

        if matches!(reason, Some(GantryError::Timeout(TimeoutKind::Liveness))) {
            let _ = self.sessions.broadcast_to_room(
                &agent,
                &PanelEvent::Error {
                    code: gantry_core::errors::TIMEOUT,
                    message: LIVENESS_TIMEOUT_MESSAGE.into(),
                    server: Some(agent.clone()),
                },
            );
        }
        let _ = self.sessions.broadcast_to_room(
            &agent,
            &PanelEvent::Status {
                server: agent.clone(),
                online: false,
            },
        );
        info!(conn_id = %conn.id, agent_id = %agent, reason = label, "agent offline");
    }

    /// Tell the subscriber that owned `transfer` that it failed.
    pub fn notify_transfer_failed(
        &self,
        agent: Option<AgentId>,
        transfer: &PendingTransfer,
        err: &GantryError,
    ) {
        let Some(session) = self.sessions.get(&transfer.requester) else {
            debug!(session_id = %transfer.requester, "transfer owner already gone");
            return;
        };
        if transfer.direction == TransferDirection::Upload {
            session.set_upload_target(None);
        }
        warn!(
            session_id = %session.id,
            path = %transfer.path,
            direction = %transfer.direction,
            error = %err,
            "transfer failed"
        );
        let _ = session.send_event(&PanelEvent::error(err, agent));
    }

    /// Fan a console line out to `agent`'s room.
    pub fn broadcast_console(&self, agent: &AgentId, line: ConsoleLine) -> usize {
        self.sessions.broadcast_to_room(
            agent,
            &PanelEvent::Console {
                server: agent.clone(),
                line,
            },
        )
    }

    /// Track a new subscriber session.
    pub fn attach_session(&self, session: Arc<PanelSession>) {
        self.sessions.add(session);
        gauge!(PANEL_SESSIONS_ACTIVE).set(self.sessions.count() as f64);
    }

    /// Forget a subscriber session and abandon its open upload.
    pub fn detach_session(&self, session: &PanelSession) {
        let _ = self.sessions.remove(&session.id);
        gauge!(PANEL_SESSIONS_ACTIVE).set(self.sessions.count() as f64);

        let Some(agent) = session.upload_target() else {
            return;
        };
        if let Some(conn) = self.registry.lookup(&agent) {
            if let Some(upload) = conn
                .transfer()
                .abandon(TransferDirection::Upload, &session.id)
            {
                debug!(agent_id = %agent, path = %upload.path, "upload abandoned by subscriber");
                let _ = conn.send_message(&AgentMessage::error(format!(
                    "Upload of {} was aborted",
                    upload.path
                )));
            }
        }
    }

    /// Close every agent and stop the socket loops.
    pub fn shutdown(&self) {
        self.closing.cancel();
        for conn in self.registry.all() {
            self.disconnect_agent(&conn, None);
        }
    }
}
