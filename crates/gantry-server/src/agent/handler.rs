//! Agent socket lifecycle, from upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use gantry_core::errors::{GantryError, TimeoutKind};
use gantry_core::protocol::AgentMessage;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::AgentConnection;
use super::router;
use crate::frame::{self, Frame};
use crate::hub::Hub;
use crate::metrics::{AGENT_CONNECTIONS_TOTAL, AGENT_PROTOCOL_ERRORS_TOTAL};

/// Run one agent socket.
///
/// 1. Spawns the writer task fed by the connection's outbound queue
/// 2. Closes the socket if `LOGIN` does not succeed within the
///    authentication window
/// 3. Routes frames in arrival order; fatal errors close the connection
/// 4. Destroys the connection through the hub on exit
#[instrument(skip_all, fields(conn_id))]
pub async fn run_agent_connection(socket: WebSocket, hub: Arc<Hub>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<Frame>(hub.outbound_queue_size());
    let conn = Arc::new(AgentConnection::new(tx));
    let _ = tracing::Span::current().record("conn_id", conn.id.as_str());
    counter!(AGENT_CONNECTIONS_TOTAL).increment(1);
    debug!("agent socket accepted");

    let writer = frame::spawn_writer(ws_tx, rx);
    let cancel = conn.cancel_token();
    let closing = hub.closing();
    let auth_deadline = tokio::time::sleep(hub.policy().auth_timeout);
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = closing.cancelled() => break,
            () = &mut auth_deadline, if !conn.is_authenticated() => {
                warn!("no successful LOGIN within the authentication window");
                hub.fail_agent(&conn, GantryError::Timeout(TimeoutKind::Authentication));
                break;
            }
            frame = ws_rx.next() => {
                let result = match frame {
                    Some(Ok(Message::Text(text))) => {
                        router::route_text(&hub, &conn, text.as_str()).await
                    }
                    Some(Ok(Message::Binary(data))) => router::route_binary(&hub, &conn, data),
                    Some(Ok(Message::Close(_))) | None => break,
                    // Transport-level pings do not count as liveness.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(()),
                    Some(Err(e)) => {
                        debug!(error = %e, "agent socket error");
                        break;
                    }
                };
                if let Err(err) = result {
                    if err.is_fatal() {
                        counter!(AGENT_PROTOCOL_ERRORS_TOTAL).increment(1);
                        warn!(error = %err, code = err.code(), "closing agent connection");
                        hub.fail_agent(&conn, err);
                        break;
                    }
                    debug!(error = %err, "rejected agent frame");
                    let _ = conn.send_message(&AgentMessage::error(err.to_string()));
                }
            }
        }
    }

    hub.disconnect_agent(&conn, None);
    frame::drain_writer(writer).await;
    let agent = conn.agent_id();
    info!(
        agent_id = agent.as_deref().unwrap_or("-"),
        age_secs = conn.age().as_secs(),
        dropped = conn.drop_count(),
        "agent socket closed"
    );
}
