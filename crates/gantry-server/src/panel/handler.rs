//! Subscriber socket lifecycle.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::relay;
use super::session::PanelSession;
use crate::frame::{self, CLOSE_GOING_AWAY, CLOSE_NORMAL, Frame};
use crate::hub::Hub;

/// Run one subscriber socket until the peer leaves or the server shuts down.
#[instrument(skip_all, fields(session_id))]
pub async fn run_panel_session(socket: WebSocket, hub: Arc<Hub>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<Frame>(hub.outbound_queue_size());
    let session = Arc::new(PanelSession::new(tx));
    let _ = tracing::Span::current().record("session_id", session.id.as_str());
    hub.attach_session(session.clone());
    debug!("subscriber connected");

    let writer = frame::spawn_writer(ws_tx, rx);
    let closing = hub.closing();
    let mut close_code = CLOSE_NORMAL;

    loop {
        tokio::select! {
            () = closing.cancelled() => {
                close_code = CLOSE_GOING_AWAY;
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    relay::handle_text(&hub, &session, text.as_str()).await;
                }
                Some(Ok(Message::Binary(data))) => relay::handle_binary(&hub, &session, data),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "subscriber socket error");
                    break;
                }
            },
        }
    }

    hub.detach_session(&session);
    let _ = session.send(Frame::Close {
        code: close_code,
        reason: String::new(),
    });
    frame::drain_writer(writer).await;
    info!(dropped = session.drop_count(), "subscriber disconnected");
}
