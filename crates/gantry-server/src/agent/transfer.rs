//! File transfer phases.
//!
//! Each agent connection holds a [`TransferSlot`] that is either idle or
//! holds exactly one [`PendingTransfer`] (`AWAITING_DATA`). Binary frames are
//! only attributable while a transfer is open; end-of-transfer completes it
//! and the transfer timer expiring times it out.

use std::fmt;
use std::sync::Arc;

use gantry_core::errors::{GantryError, TimeoutKind};
use gantry_core::ids::SessionId;
use gantry_core::protocol::{ProtocolViolation, TransferRequest};
use metrics::counter;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::AgentConnection;
use crate::hub::Hub;

/// Which way the payload flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    /// Agent to subscriber.
    Download,
    /// Subscriber to agent.
    Upload,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Upload => "upload",
        })
    }
}

/// An open transfer phase on one connection.
#[derive(Debug)]
pub struct PendingTransfer {
    /// Transfer id, used to match timer expiry against the open phase.
    pub id: Uuid,
    /// Payload direction.
    pub direction: TransferDirection,
    /// Agent-relative file path.
    pub path: String,
    /// Subscriber that asked for the transfer.
    pub requester: SessionId,
    /// Declared payload size, if known.
    pub size: Option<u64>,
    /// When the phase opened.
    pub started: Instant,
    /// Bytes accepted so far.
    pub bytes: u64,
    /// Frames that could not be queued to the receiving side.
    pub undelivered: u32,
    violations: u32,
    timer: CancellationToken,
}

impl PendingTransfer {
    /// Open a new phase for `request`.
    pub fn new(direction: TransferDirection, request: &TransferRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            direction,
            path: request.path.clone(),
            requester: request.requester.clone(),
            size: request.size,
            started: Instant::now(),
            bytes: 0,
            undelivered: 0,
            violations: 0,
            timer: CancellationToken::new(),
        }
    }

    /// Whether every accepted frame reached the receiving side.
    pub fn is_intact(&self) -> bool {
        self.undelivered == 0
    }
}

impl Drop for PendingTransfer {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

/// Result of checking one binary frame against the open phase.
#[derive(Debug)]
pub enum FrameVerdict {
    /// Forward the frame to `requester` (downloads) or the agent (uploads).
    Forward {
        /// Subscriber that owns the transfer.
        requester: SessionId,
    },
    /// The frame exceeded the cap and was dropped; the phase stays open.
    Rejected {
        /// Subscriber that owns the transfer.
        requester: SessionId,
        /// Frame size.
        size: usize,
    },
    /// The cap was violated again; the phase has been closed.
    Aborted(PendingTransfer),
    /// An earlier frame was lost; this one is dropped too and the phase
    /// stays open until end-of-transfer or the timer.
    Discarded,
}

/// Per-connection transfer state: idle or one open phase.
#[derive(Default)]
pub struct TransferSlot {
    inner: Mutex<Option<PendingTransfer>>,
}

impl TransferSlot {
    /// Create an idle slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a phase. Fails if one is already open.
    pub fn open(&self, transfer: PendingTransfer) -> Result<CancellationToken, GantryError> {
        let mut slot = self.inner.lock();
        if slot.is_some() {
            return Err(GantryError::TransferBusy);
        }
        let timer = transfer.timer.clone();
        *slot = Some(transfer);
        Ok(timer)
    }

    /// Close the open phase on end-of-transfer.
    ///
    /// Closing an idle slot is a protocol violation and changes nothing.
    pub fn finish(&self) -> Result<PendingTransfer, ProtocolViolation> {
        self.inner.lock().take().ok_or(ProtocolViolation::NoOpenTransfer)
    }

    /// Close the phase only if it is the one identified by `id`.
    pub fn expire(&self, id: Uuid) -> Option<PendingTransfer> {
        let mut slot = self.inner.lock();
        if slot.as_ref().is_some_and(|t| t.id == id) {
            slot.take()
        } else {
            None
        }
    }

    /// Drop whatever is open.
    pub fn clear(&self) -> Option<PendingTransfer> {
        self.inner.lock().take()
    }

    /// Close the open phase if it belongs to `requester` and flows in
    /// `direction`.
    pub fn abandon(
        &self,
        direction: TransferDirection,
        requester: &SessionId,
    ) -> Option<PendingTransfer> {
        let mut slot = self.inner.lock();
        if slot
            .as_ref()
            .is_some_and(|t| t.direction == direction && t.requester == *requester)
        {
            slot.take()
        } else {
            None
        }
    }

    /// Record that a frame of the open `direction` phase could not be
    /// queued. Every later frame of that phase is discarded.
    ///
    /// Returns `true` only for the first lost frame.
    pub fn mark_undelivered(&self, direction: TransferDirection) -> bool {
        let mut slot = self.inner.lock();
        match slot.as_mut() {
            Some(transfer) if transfer.direction == direction => {
                transfer.undelivered += 1;
                transfer.undelivered == 1
            }
            _ => false,
        }
    }

    /// Whether a phase is open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Direction and requester of the open phase.
    pub fn current(&self) -> Option<(TransferDirection, SessionId)> {
        self.inner
            .lock()
            .as_ref()
            .map(|t| (t.direction, t.requester.clone()))
    }

    /// Check a binary frame of `len` bytes travelling in `direction`.
    ///
    /// Frames over `limit` are never forwarded. The first `tolerated`
    /// violations leave the phase open; the next one closes it.
    pub fn check_frame(
        &self,
        direction: TransferDirection,
        len: usize,
        limit: usize,
        tolerated: u32,
    ) -> Result<FrameVerdict, ProtocolViolation> {
        let mut slot = self.inner.lock();
        let Some(transfer) = slot.as_mut() else {
            return Err(ProtocolViolation::UnexpectedBinary);
        };
        if transfer.direction != direction {
            return Err(ProtocolViolation::UnexpectedBinary);
        }
        if !transfer.is_intact() {
            transfer.undelivered += 1;
            return Ok(FrameVerdict::Discarded);
        }
        if len > limit {
            transfer.violations += 1;
            if transfer.violations > tolerated {
                return slot
                    .take()
                    .map(FrameVerdict::Aborted)
                    .ok_or(ProtocolViolation::UnexpectedBinary);
            }
            return Ok(FrameVerdict::Rejected {
                requester: transfer.requester.clone(),
                size: len,
            });
        }
        transfer.bytes += len as u64;
        Ok(FrameVerdict::Forward {
            requester: transfer.requester.clone(),
        })
    }
}

/// Open a phase on `conn` and arm its timer.
///
/// When the timer fires before end-of-transfer the agent connection is closed
/// with a transfer-timeout error.
pub fn begin(
    hub: &Arc<Hub>,
    conn: &Arc<AgentConnection>,
    direction: TransferDirection,
    request: &TransferRequest,
) -> Result<Uuid, GantryError> {
    let transfer = PendingTransfer::new(direction, request);
    let id = transfer.id;
    let timer = conn.transfer().open(transfer)?;
    counter!(crate::metrics::TRANSFERS_STARTED_TOTAL, "direction" => direction.to_string())
        .increment(1);
    debug!(conn_id = %conn.id, transfer_id = %id, %direction, path = %request.path, "transfer opened");

    let hub = hub.clone();
    let conn = conn.clone();
    let timeout = hub.policy().transfer_timeout;
    let stopped = conn.cancel_token();
    drop(tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(timeout) => {
                if let Some(expired) = conn.transfer().expire(id) {
                    warn!(conn_id = %conn.id, transfer_id = %id, "transfer timed out");
                    counter!(crate::metrics::TRANSFERS_TIMED_OUT_TOTAL).increment(1);
                    hub.notify_transfer_failed(
                        conn.agent_id(),
                        &expired,
                        &GantryError::Timeout(TimeoutKind::Transfer),
                    );
                    hub.fail_agent(&conn, GantryError::Timeout(TimeoutKind::Transfer));
                }
            }
            () = timer.cancelled() => {}
            () = stopped.cancelled() => {}
        }
    }));
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(path: &str) -> TransferRequest {
        TransferRequest {
            path: path.into(),
            replace: false,
            requester: SessionId::from("s1"),
            root: false,
            size: None,
        }
    }

    fn open_slot(direction: TransferDirection) -> TransferSlot {
        let slot = TransferSlot::new();
        let _ = slot
            .open(PendingTransfer::new(direction, &request("/a.txt")))
            .unwrap();
        slot
    }

    #[test]
    fn second_open_is_busy() {
        let slot = open_slot(TransferDirection::Upload);
        assert_matches!(
            slot.open(PendingTransfer::new(TransferDirection::Upload, &request("/b"))),
            Err(GantryError::TransferBusy)
        );
        assert_eq!(slot.current().unwrap().0, TransferDirection::Upload);
    }

    #[test]
    fn finish_while_idle_is_violation_without_state_change() {
        let slot = TransferSlot::new();
        assert_matches!(slot.finish(), Err(ProtocolViolation::NoOpenTransfer));
        assert!(!slot.is_open());
    }

    #[test]
    fn finish_closes_and_cancels_timer() {
        let slot = TransferSlot::new();
        let timer = slot
            .open(PendingTransfer::new(TransferDirection::Download, &request("/a")))
            .unwrap();
        let done = slot.finish().unwrap();
        assert_eq!(done.path, "/a");
        drop(done);
        assert!(timer.is_cancelled());
        assert!(!slot.is_open());
    }

    #[test]
    fn frames_within_limit_are_forwarded_and_counted() {
        let slot = open_slot(TransferDirection::Download);
        let verdict = slot
            .check_frame(TransferDirection::Download, 10, 100, 1)
            .unwrap();
        assert_matches!(verdict, FrameVerdict::Forward { requester } if requester.as_str() == "s1");
        let done = slot.finish().unwrap();
        assert_eq!(done.bytes, 10);
    }

    #[test]
    fn oversize_frame_is_rejected_then_aborts_on_repeat() {
        let slot = open_slot(TransferDirection::Upload);
        assert_matches!(
            slot.check_frame(TransferDirection::Upload, 101, 100, 1),
            Ok(FrameVerdict::Rejected { size: 101, .. })
        );
        assert!(slot.is_open());
        assert_matches!(
            slot.check_frame(TransferDirection::Upload, 500, 100, 1),
            Ok(FrameVerdict::Aborted(t)) if t.bytes == 0
        );
        assert!(!slot.is_open());
    }

    #[test]
    fn lost_frame_discards_the_rest_of_the_phase() {
        let slot = open_slot(TransferDirection::Download);
        let _ = slot
            .check_frame(TransferDirection::Download, 4, 100, 1)
            .unwrap();
        assert!(slot.mark_undelivered(TransferDirection::Download));
        assert_matches!(
            slot.check_frame(TransferDirection::Download, 4, 100, 1),
            Ok(FrameVerdict::Discarded)
        );
        assert!(!slot.mark_undelivered(TransferDirection::Download));
        let done = slot.finish().unwrap();
        assert!(!done.is_intact());
        assert_eq!(done.undelivered, 3);
    }

    #[test]
    fn mark_undelivered_ignores_other_direction() {
        let slot = open_slot(TransferDirection::Upload);
        assert!(!slot.mark_undelivered(TransferDirection::Download));
        assert!(slot.finish().unwrap().is_intact());
        assert!(!TransferSlot::new().mark_undelivered(TransferDirection::Upload));
    }

    #[test]
    fn binary_without_transfer_is_violation() {
        let slot = TransferSlot::new();
        assert_matches!(
            slot.check_frame(TransferDirection::Download, 1, 100, 1),
            Err(ProtocolViolation::UnexpectedBinary)
        );
    }

    #[test]
    fn binary_in_wrong_direction_is_violation() {
        let slot = open_slot(TransferDirection::Upload);
        assert_matches!(
            slot.check_frame(TransferDirection::Download, 1, 100, 1),
            Err(ProtocolViolation::UnexpectedBinary)
        );
        assert!(slot.is_open());
    }

    #[test]
    fn abandon_requires_matching_owner_and_direction() {
        let slot = open_slot(TransferDirection::Upload);
        assert!(
            slot.abandon(TransferDirection::Upload, &SessionId::from("other"))
                .is_none()
        );
        assert!(
            slot.abandon(TransferDirection::Download, &SessionId::from("s1"))
                .is_none()
        );
        assert!(
            slot.abandon(TransferDirection::Upload, &SessionId::from("s1"))
                .is_some()
        );
        assert!(!slot.is_open());
    }

    #[test]
    fn expire_only_matches_same_transfer() {
        let slot = TransferSlot::new();
        let first = PendingTransfer::new(TransferDirection::Upload, &request("/a"));
        let first_id = first.id;
        let _ = slot.open(first).unwrap();
        let _ = slot.finish().unwrap();
        let _ = slot
            .open(PendingTransfer::new(TransferDirection::Upload, &request("/b")))
            .unwrap();
        assert!(slot.expire(first_id).is_none());
        assert!(slot.is_open());
    }
}
