//! Agent connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use gantry_core::directory::ServerRecord;
use gantry_core::ids::{AgentId, ConnectionId};
use gantry_core::protocol::{AgentMessage, MessageKind};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::correlator::{CorrelationError, Correlator};
use super::transfer::{PendingTransfer, TransferSlot};
use crate::frame::{CLOSE_NORMAL, Frame};

/// One accepted agent socket.
///
/// Created on accept; it enters the registry only after a successful `LOGIN`.
pub struct AgentConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the socket's write task.
    tx: mpsc::Sender<Frame>,
    /// When this connection was established.
    connected_at: Instant,
    /// When the last `PONG` was received (or the socket was accepted).
    last_pong: Mutex<Instant>,
    /// Server record, set once the handshake succeeds.
    server: RwLock<Option<ServerRecord>>,
    transfer: TransferSlot,
    correlator: Correlator,
    /// Stops the heartbeat, reader and transfer timer.
    cancel: CancellationToken,
    closed: AtomicBool,
    /// Count of frames dropped due to a full channel.
    dropped_messages: AtomicU64,
}

impl AgentConnection {
    /// Create a new unauthenticated connection.
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            server: RwLock::new(None),
            transfer: TransferSlot::new(),
            correlator: Correlator::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame for the writer.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, frame: Frame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(crate::metrics::FRAMES_DROPPED_TOTAL, "peer" => "agent")
                .increment(1);
            false
        }
    }

    /// Serialize and queue a control message.
    pub fn send_message(&self, message: &AgentMessage) -> bool {
        self.send(Frame::Text(message.to_json()))
    }

    /// Queue raw file bytes.
    pub fn send_binary(&self, data: Bytes) -> bool {
        self.send(Frame::Binary(data))
    }

    /// Queue a close frame; the writer flushes everything before it.
    pub fn send_close(&self, code: u16, reason: &str) -> bool {
        self.send(Frame::Close {
            code,
            reason: reason.to_owned(),
        })
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a liveness acknowledgment.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last `PONG` (or accept).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Bind the server record after a successful handshake.
    pub fn authenticate(&self, server: ServerRecord) {
        *self.server.write() = Some(server);
    }

    /// Whether the handshake has completed.
    pub fn is_authenticated(&self) -> bool {
        self.server.read().is_some()
    }

    /// The bound server record.
    pub fn server(&self) -> Option<ServerRecord> {
        self.server.read().clone()
    }

    /// The bound agent id.
    pub fn agent_id(&self) -> Option<AgentId> {
        self.server.read().as_ref().map(|s| s.id.clone())
    }

    /// The bound server's display name.
    pub fn server_name(&self) -> Option<String> {
        self.server.read().as_ref().map(|s| s.name.clone())
    }

    /// Transfer phase state.
    pub fn transfer(&self) -> &TransferSlot {
        &self.transfer
    }

    /// Reply waiter table.
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Token cancelled when the connection is destroyed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send `message` and wait for the next message of `expected`.
    pub async fn request(
        &self,
        message: &AgentMessage,
        expected: MessageKind,
    ) -> Result<AgentMessage, CorrelationError> {
        let pending = self.correlator.register(expected)?;
        if !self.send_message(message) {
            self.correlator.cancel(&pending);
            return Err(CorrelationError::ConnectionClosed);
        }
        pending.reply().await
    }

    /// Like [`request`](Self::request) with an explicit deadline, except that
    /// it waits behind an outstanding request of the same kind instead of
    /// failing. `deadline` covers the wait for a turn and the wait for the
    /// reply.
    pub async fn request_within(
        &self,
        message: &AgentMessage,
        expected: MessageKind,
        deadline: Duration,
    ) -> Result<AgentMessage, CorrelationError> {
        let started = Instant::now();
        let pending = self.correlator.register_queued(expected, deadline).await?;
        if !self.send_message(message) {
            self.correlator.cancel(&pending);
            return Err(CorrelationError::ConnectionClosed);
        }
        let remaining = deadline.saturating_sub(started.elapsed());
        self.correlator.wait_within(pending, remaining).await
    }

    /// Destroy the connection state in one synchronous step.
    ///
    /// Cancels the heartbeat, reader and transfer timer, discards pending
    /// waiters without firing them, and clears the transfer slot. Returns the
    /// transfer that was open, only on the first call.
    pub fn shutdown(&self) -> Option<PendingTransfer> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.cancel.cancel();
        let discarded = self.correlator.close();
        let transfer = self.transfer.clear();
        debug!(
            conn_id = %self.id,
            discarded_waiters = discarded,
            had_transfer = transfer.is_some(),
            "agent connection destroyed"
        );
        let _ = self.send_close(CLOSE_NORMAL, "");
        transfer
    }
}
