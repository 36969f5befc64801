//! Outbound socket frames shared by agent connections and subscriber sessions.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer broke the wire contract.
pub const CLOSE_POLICY: u16 = 1008;
/// The server is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// How long a finished socket waits for its writer to flush.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// One frame queued for a socket's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// JSON text frame.
    Text(String),
    /// Raw file bytes.
    Binary(Bytes),
    /// Close the socket after flushing everything queued before it.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl Frame {
    /// Whether this frame ends the writer loop.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Convert into an axum WebSocket message.
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(data) => Message::Binary(data),
            Self::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}

/// Spawn the writer task for one socket.
///
/// Forwards queued frames in order and stops after the first close frame or
/// send failure.
pub fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let close = frame.is_close();
            if sink.send(frame.into_message()).await.is_err() || close {
                break;
            }
        }
        let _ = sink.close().await;
    })
}

/// Give a writer a moment to flush, then abort it.
pub async fn drain_writer(mut writer: JoinHandle<()>) {
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}
