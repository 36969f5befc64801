//! Reply correlation for requests issued on an agent connection.
//!
//! Each connection owns one [`Correlator`]: a waiter table keyed by the
//! expected reply kind. A waiter is registered before the request is sent,
//! fires at most once, and is discarded without firing when the connection
//! is destroyed. Callers that would rather wait their turn than fail on an
//! outstanding request of the same kind use [`Correlator::register_queued`].

use std::collections::HashMap;
use std::time::Duration;

use gantry_core::errors::GantryError;
use gantry_core::protocol::{AgentMessage, MessageKind};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};

/// Why a correlated request produced no reply.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// A request expecting the same reply kind is still outstanding.
    #[error("a request awaiting {0} is already pending on this connection")]
    AlreadyPending(MessageKind),
    /// The connection was destroyed before the reply arrived.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,
    /// The caller's deadline passed first.
    #[error("no {kind} reply within {}ms", .after.as_millis())]
    TimedOut {
        /// Expected reply kind.
        kind: MessageKind,
        /// Deadline that elapsed.
        after: Duration,
    },
}

impl From<CorrelationError> for GantryError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::AlreadyPending(_) => Self::invalid(err.to_string()),
            CorrelationError::ConnectionClosed => Self::ConnectionClosed,
            CorrelationError::TimedOut { .. } => {
                Self::Timeout(gantry_core::errors::TimeoutKind::Transfer)
            }
        }
    }
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<AgentMessage>,
}

#[derive(Default)]
struct Table {
    waiters: HashMap<MessageKind, Waiter>,
    next_ticket: u64,
    closed: bool,
}

/// Handle returned by [`Correlator::register`].
#[derive(Debug)]
pub struct Pending {
    /// Expected reply kind.
    pub kind: MessageKind,
    ticket: u64,
    rx: oneshot::Receiver<AgentMessage>,
}

impl Pending {
    /// Wait for the reply with no deadline.
    pub async fn reply(self) -> Result<AgentMessage, CorrelationError> {
        self.rx.await.map_err(|_| CorrelationError::ConnectionClosed)
    }
}

/// Per-connection waiter table.
#[derive(Default)]
pub struct Correlator {
    table: Mutex<Table>,
    freed: Notify,
}

impl Correlator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next message of `kind`.
    pub fn register(&self, kind: MessageKind) -> Result<Pending, CorrelationError> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(CorrelationError::ConnectionClosed);
        }
        if table.waiters.contains_key(&kind) {
            return Err(CorrelationError::AlreadyPending(kind));
        }
        table.next_ticket += 1;
        let ticket = table.next_ticket;
        let (tx, rx) = oneshot::channel();
        let _ = table.waiters.insert(kind, Waiter { ticket, tx });
        Ok(Pending { kind, ticket, rx })
    }

    /// Register a waiter for `kind`, first waiting for an outstanding one of
    /// the same kind to go away. Gives up after `deadline`.
    pub async fn register_queued(
        &self,
        kind: MessageKind,
        deadline: Duration,
    ) -> Result<Pending, CorrelationError> {
        let turn = async {
            loop {
                let freed = self.freed.notified();
                tokio::pin!(freed);
                let _ = freed.as_mut().enable();
                match self.register(kind) {
                    Err(CorrelationError::AlreadyPending(_)) => freed.await,
                    registered => return registered,
                }
            }
        };
        tokio::time::timeout(deadline, turn)
            .await
            .map_err(|_| CorrelationError::TimedOut {
                kind,
                after: deadline,
            })?
    }

    /// Hand an inbound reply to its waiter.
    ///
    /// Returns the message back when nobody is waiting for its kind.
    pub fn resolve(&self, message: AgentMessage) -> Result<(), AgentMessage> {
        let waiter = self.table.lock().waiters.remove(&message.kind());
        match waiter {
            // A receiver dropped by a timed-out caller simply discards it.
            Some(waiter) => {
                let _ = waiter.tx.send(message);
                self.freed.notify_waiters();
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Remove a waiter that is still owned by `pending`.
    pub fn cancel(&self, pending: &Pending) {
        let mut table = self.table.lock();
        if table
            .waiters
            .get(&pending.kind)
            .is_some_and(|w| w.ticket == pending.ticket)
        {
            let _ = table.waiters.remove(&pending.kind);
            drop(table);
            self.freed.notify_waiters();
        }
    }

    /// Discard every waiter without firing it and refuse new ones.
    pub fn close(&self) -> usize {
        let mut table = self.table.lock();
        table.closed = true;
        let dropped = table.waiters.len();
        table.waiters.clear();
        drop(table);
        self.freed.notify_waiters();
        dropped
    }

    /// Number of outstanding waiters.
    pub fn pending(&self) -> usize {
        self.table.lock().waiters.len()
    }

    /// Wait for the reply, giving up after `deadline`.
    pub async fn wait_within(
        &self,
        mut pending: Pending,
        deadline: Duration,
    ) -> Result<AgentMessage, CorrelationError> {
        match tokio::time::timeout(deadline, &mut pending.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CorrelationError::ConnectionClosed),
            Err(_) => {
                self.cancel(&pending);
                Err(CorrelationError::TimedOut {
                    kind: pending.kind,
                    after: deadline,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn history_reply() -> AgentMessage {
        AgentMessage::ConsoleHistory {
            history: Some(serde_json::json!(["line"])),
        }
    }

    #[tokio::test]
    async fn first_matching_reply_resolves_waiter() {
        let c = Correlator::new();
        let pending = c.register(MessageKind::ConsoleHistory).unwrap();
        assert_eq!(c.pending(), 1);

        c.resolve(history_reply()).unwrap();
        assert_eq!(c.pending(), 0);

        let reply = pending.reply().await.unwrap();
        assert_eq!(reply, history_reply());
    }

    #[test]
    fn second_request_of_same_kind_is_rejected() {
        let c = Correlator::new();
        let _first = c.register(MessageKind::AllFiles).unwrap();
        assert_matches!(
            c.register(MessageKind::AllFiles),
            Err(CorrelationError::AlreadyPending(MessageKind::AllFiles))
        );
        // A different kind is independent.
        let _other = c.register(MessageKind::PlayerList).unwrap();
        assert_eq!(c.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_waits_for_its_turn() {
        let c = std::sync::Arc::new(Correlator::new());
        let first = c.register(MessageKind::PlayerList).unwrap();

        let queued = tokio::spawn({
            let c = c.clone();
            async move {
                c.register_queued(MessageKind::PlayerList, Duration::from_secs(5))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queued.is_finished());

        c.resolve(AgentMessage::PlayerList { players: vec![] }).unwrap();
        assert_eq!(
            first.reply().await.unwrap(),
            AgentMessage::PlayerList { players: vec![] }
        );
        let second = queued.await.unwrap().unwrap();
        assert_eq!(second.kind, MessageKind::PlayerList);
        assert_eq!(c.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_gives_up_after_deadline() {
        let c = Correlator::new();
        let _first = c.register(MessageKind::AllFiles).unwrap();
        assert_matches!(
            c.register_queued(MessageKind::AllFiles, Duration::from_secs(1))
                .await,
            Err(CorrelationError::TimedOut { kind: MessageKind::AllFiles, .. })
        );
        assert_eq!(c.pending(), 1);
    }

    #[tokio::test]
    async fn queued_request_sees_close() {
        let c = std::sync::Arc::new(Correlator::new());
        let _first = c.register(MessageKind::FileData).unwrap();
        let queued = tokio::spawn({
            let c = c.clone();
            async move {
                c.register_queued(MessageKind::FileData, Duration::from_secs(5))
                    .await
            }
        });
        tokio::task::yield_now().await;
        let _ = c.close();
        assert_matches!(
            queued.await.unwrap(),
            Err(CorrelationError::ConnectionClosed)
        );
    }

    #[test]
    fn unsolicited_reply_is_returned() {
        let c = Correlator::new();
        let msg = AgentMessage::PlayerList { players: vec![] };
        assert_eq!(c.resolve(msg.clone()), Err(msg));
    }

    #[test]
    fn waiter_fires_only_once() {
        let c = Correlator::new();
        let _pending = c.register(MessageKind::ConsoleHistory).unwrap();
        assert!(c.resolve(history_reply()).is_ok());
        assert!(c.resolve(history_reply()).is_err());
    }

    #[tokio::test]
    async fn close_discards_waiters_without_firing() {
        let c = Correlator::new();
        let pending = c.register(MessageKind::FileData).unwrap();
        assert_eq!(c.close(), 1);

        assert_matches!(pending.reply().await, Err(CorrelationError::ConnectionClosed));
        // Late replies find nothing to match.
        assert!(
            c.resolve(AgentMessage::FileData {
                file: serde_json::json!({}),
                requester: None
            })
            .is_err()
        );
        assert_matches!(
            c.register(MessageKind::FileData),
            Err(CorrelationError::ConnectionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_removes_waiter() {
        let c = Correlator::new();
        let pending = c.register(MessageKind::AllFiles).unwrap();
        let result = c.wait_within(pending, Duration::from_secs(1)).await;
        assert_matches!(
            result,
            Err(CorrelationError::TimedOut { kind: MessageKind::AllFiles, .. })
        );
        assert_eq!(c.pending(), 0);
        // The kind is free again.
        let _again = c.register(MessageKind::AllFiles).unwrap();
    }

    #[test]
    fn stale_cancel_does_not_remove_newer_waiter() {
        let c = Correlator::new();
        let first = c.register(MessageKind::AllFiles).unwrap();
        c.resolve(AgentMessage::AllFiles { files: vec![] }).unwrap();
        let _second = c.register(MessageKind::AllFiles).unwrap();
        c.cancel(&first);
        assert_eq!(c.pending(), 1);
    }

    #[test]
    fn maps_into_gantry_error() {
        assert_eq!(
            GantryError::from(CorrelationError::ConnectionClosed).code(),
            gantry_core::errors::CONNECTION_CLOSED
        );
        assert_eq!(
            GantryError::from(CorrelationError::AlreadyPending(MessageKind::AllFiles)).code(),
            gantry_core::errors::INVALID_REQUEST
        );
    }
}
