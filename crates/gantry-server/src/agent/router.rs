//! Inbound frame dispatch for agent sockets.

use std::sync::Arc;

use bytes::Bytes;
use gantry_core::errors::GantryError;
use gantry_core::ids::AgentId;
use gantry_core::protocol::{AgentMessage, ProtocolViolation, TransferRequest};
use metrics::counter;
use tracing::{debug, warn};

use super::connection::AgentConnection;
use super::transfer::{self, FrameVerdict, TransferDirection};
use crate::hub::Hub;
use crate::metrics::{OVERSIZE_FRAMES_TOTAL, TRANSFER_BYTES_TOTAL, TRANSFERS_COMPLETED_TOTAL};
use crate::panel::events::{ConsoleLine, PanelEvent};

/// Handle one text frame from an agent.
///
/// Errors for which [`GantryError::is_fatal`] holds must terminate the
/// connection; the rest are reported back with `ERROR`.
pub async fn route_text(
    hub: &Arc<Hub>,
    conn: &Arc<AgentConnection>,
    text: &str,
) -> Result<(), GantryError> {
    let message = AgentMessage::parse(text)?;
    let kind = message.kind();
    if !kind.agent_may_send() {
        return Err(ProtocolViolation::UnexpectedKind { kind }.into());
    }

    let Some(agent) = conn.agent_id() else {
        return match message {
            AgentMessage::Login { token } => hub.login(conn, &token).await.map(|_| ()),
            AgentMessage::Pong => {
                conn.mark_alive();
                Ok(())
            }
            _ => Err(ProtocolViolation::NotAuthenticated.into()),
        };
    };

    match message {
        AgentMessage::Login { .. } => Err(ProtocolViolation::UnexpectedKind { kind }.into()),
        AgentMessage::Pong => {
            conn.mark_alive();
            Ok(())
        }
        AgentMessage::Console {
            line,
            level,
            timestamp,
        } => {
            let line = if timestamp > 0 {
                ConsoleLine {
                    line,
                    level,
                    timestamp,
                }
            } else {
                ConsoleLine::now(line, &level)
            };
            let _ = hub.broadcast_console(&agent, line);
            Ok(())
        }
        AgentMessage::DownloadFile(request) => start_download(hub, conn, &agent, &request),
        AgentMessage::FileData {
            file,
            requester: Some(requester),
        } => {
            let delivered = hub.sessions().send_to(
                &requester,
                &PanelEvent::FileData {
                    server: agent,
                    file,
                },
            );
            if !delivered {
                debug!(session_id = %requester, "file data for a departed subscriber dropped");
            }
            Ok(())
        }
        AgentMessage::EndOfTransfer => finish_transfer(hub, conn, &agent),
        AgentMessage::Error { message } => {
            warn!(agent_id = %agent, %message, "agent reported an error");
            if let Some(open) = conn.transfer().clear() {
                hub.notify_transfer_failed(Some(agent), &open, &GantryError::invalid(message));
            }
            Ok(())
        }
        reply => {
            if let Err(unmatched) = conn.correlator().resolve(reply) {
                debug!(agent_id = %agent, kind = %unmatched.kind(), "unsolicited reply dropped");
            }
            Ok(())
        }
    }
}

/// Handle one binary frame from an agent (download payload).
pub fn route_binary(
    hub: &Hub,
    conn: &AgentConnection,
    data: Bytes,
) -> Result<(), GantryError> {
    let Some(agent) = conn.agent_id() else {
        return Err(ProtocolViolation::NotAuthenticated.into());
    };
    let policy = hub.policy();
    let size = data.len();
    let verdict = conn.transfer().check_frame(
        TransferDirection::Download,
        size,
        policy.max_binary_frame,
        policy.max_frame_violations,
    )?;
    match verdict {
        FrameVerdict::Forward { requester } => {
            let delivered = hub
                .sessions()
                .get(&requester)
                .is_some_and(|session| session.send_binary(data));
            if delivered {
                counter!(TRANSFER_BYTES_TOTAL, "direction" => "download").increment(size as u64);
            } else if conn.transfer().mark_undelivered(TransferDirection::Download) {
                warn!(
                    agent_id = %agent,
                    session_id = %requester,
                    "download frame could not be delivered, discarding the rest"
                );
            }
            Ok(())
        }
        FrameVerdict::Discarded => Ok(()),
        FrameVerdict::Rejected { requester, size } => {
            counter!(OVERSIZE_FRAMES_TOTAL).increment(1);
            let err = GantryError::Capacity {
                size,
                limit: policy.max_binary_frame,
            };
            let _ = hub
                .sessions()
                .send_to(&requester, &PanelEvent::error(&err, Some(agent)));
            Err(err)
        }
        FrameVerdict::Aborted(open) => {
            counter!(OVERSIZE_FRAMES_TOTAL).increment(1);
            let err = GantryError::Capacity {
                size,
                limit: policy.max_binary_frame,
            };
            hub.notify_transfer_failed(Some(agent), &open, &err);
            Err(err)
        }
    }
}

fn start_download(
    hub: &Arc<Hub>,
    conn: &Arc<AgentConnection>,
    agent: &AgentId,
    request: &TransferRequest,
) -> Result<(), GantryError> {
    if let Err(err) = transfer::begin(hub, conn, TransferDirection::Download, request) {
        let _ = hub
            .sessions()
            .send_to(&request.requester, &PanelEvent::error(&err, Some(agent.clone())));
        return Err(err);
    }
    let _ = hub.sessions().send_to(
        &request.requester,
        &PanelEvent::DownloadStarted {
            server: agent.clone(),
            path: request.path.clone(),
            size: request.size,
        },
    );
    Ok(())
}

fn finish_transfer(
    hub: &Hub,
    conn: &AgentConnection,
    agent: &AgentId,
) -> Result<(), GantryError> {
    let done = conn.transfer().finish()?;
    if !done.is_intact() {
        let what = match done.direction {
            TransferDirection::Download => "download data",
            TransferDirection::Upload => "upload data",
        };
        hub.notify_transfer_failed(Some(agent.clone()), &done, &GantryError::Undelivered(what));
        return Ok(());
    }
    counter!(TRANSFERS_COMPLETED_TOTAL, "direction" => done.direction.to_string()).increment(1);
    debug!(
        agent_id = %agent,
        path = %done.path,
        bytes = done.bytes,
        elapsed_ms = done.started.elapsed().as_millis(),
        "transfer complete"
    );
    if let Some(session) = hub.sessions().get(&done.requester) {
        if done.direction == TransferDirection::Upload {
            session.set_upload_target(None);
        }
        let _ = session.send_event(&PanelEvent::TransferComplete {
            server: agent.clone(),
            path: done.path.clone(),
            bytes: done.bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::frame::Frame;
    use crate::panel::session::{PanelSession, SessionIdentity};
    use assert_matches::assert_matches;
    use gantry_core::directory::{AccountRecord, MemoryDirectory, ServerRecord};
    use gantry_core::ids::{AccountId, SessionId};
    use gantry_core::permissions::Permissions;
    use gantry_core::protocol::MessageKind;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    const LIMIT: usize = 16;

    fn hub() -> Arc<Hub> {
        let directory = MemoryDirectory::new().with_server(
            "tok",
            ServerRecord {
                id: AgentId::from("srv"),
                name: "lobby".into(),
                owner: AccountId::from("owner"),
                suspended: false,
                users: vec![],
                ftp_password: None,
            },
        );
        let mut config = ServerConfig::default();
        config.timing.max_binary_frame = LIMIT;
        Arc::new(Hub::new(Arc::new(directory), &config))
    }

    async fn logged_in(hub: &Arc<Hub>) -> (Arc<AgentConnection>, mpsc::Receiver<Frame>) {
        let (tx, mut rx) = mpsc::channel(64);
        let conn = Arc::new(AgentConnection::new(tx));
        route_text(hub, &conn, r#"{"kind":"LOGIN","token":"tok"}"#)
            .await
            .unwrap();
        // LOGIN_STATUS
        let _ = rx.recv().await.unwrap();
        (conn, rx)
    }

    fn subscriber(hub: &Hub) -> (Arc<PanelSession>, mpsc::Receiver<Frame>) {
        subscriber_with_queue(hub, 64)
    }

    fn subscriber_with_queue(
        hub: &Hub,
        capacity: usize,
    ) -> (Arc<PanelSession>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Arc::new(PanelSession::new(tx));
        session.bind(SessionIdentity {
            account: AccountRecord {
                id: AccountId::from("owner"),
                tag: "owner#1".into(),
                admin: false,
                suspended: false,
            },
            token: "s".into(),
            rooms: HashMap::from([(AgentId::from("srv"), Permissions::ALL)]),
        });
        hub.attach_session(session.clone());
        (session, rx)
    }

    fn next_event(rx: &mut mpsc::Receiver<Frame>) -> serde_json::Value {
        match rx.try_recv().unwrap() {
            Frame::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    fn download_echo(requester: &SessionId) -> String {
        AgentMessage::DownloadFile(TransferRequest {
            path: "/logs/latest.log".into(),
            replace: false,
            requester: requester.clone(),
            root: false,
            size: Some(20),
        })
        .to_json()
    }

    #[tokio::test]
    async fn only_login_before_handshake() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(AgentConnection::new(tx));
        let err = route_text(&hub, &conn, r#"{"kind":"CONSOLE","line":"hi"}"#)
            .await
            .unwrap_err();
        assert_matches!(err, GantryError::Protocol(ProtocolViolation::NotAuthenticated));
        assert!(err.is_fatal());
        // PONG is tolerated.
        route_text(&hub, &conn, r#"{"kind":"PONG"}"#).await.unwrap();
    }

    #[tokio::test]
    async fn core_only_kinds_are_rejected() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let err = route_text(&hub, &conn, r#"{"kind":"FETCH_FILE","path":"/"}"#)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GantryError::Protocol(ProtocolViolation::UnexpectedKind {
                kind: MessageKind::FetchFile
            })
        );
        hub.shutdown();
    }

    #[tokio::test]
    async fn malformed_text_is_fatal() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(AgentConnection::new(tx));
        let err = route_text(&hub, &conn, "not json").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn console_lines_reach_the_room() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (_session, mut events) = subscriber(&hub);
        route_text(
            &hub,
            &conn,
            r#"{"kind":"CONSOLE","line":"[12:00] Done","level":"INFO","timestamp":7}"#,
        )
        .await
        .unwrap();
        let event = next_event(&mut events);
        assert_eq!(event["event"], "console");
        assert_eq!(event["data"]["line"], "[12:00] Done");
        assert_eq!(event["data"]["timestamp"], 7);
        hub.shutdown();
    }

    #[tokio::test]
    async fn replies_resolve_waiters() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let pending = conn.correlator().register(MessageKind::PlayerList).unwrap();
        route_text(&hub, &conn, r#"{"kind":"PLAYER_LIST","players":[{"name":"a"}]}"#)
            .await
            .unwrap();
        let reply = pending.reply().await.unwrap();
        assert_matches!(reply, AgentMessage::PlayerList { players } if players.len() == 1);

        // Nobody waiting: dropped silently.
        route_text(&hub, &conn, r#"{"kind":"PLAYER_LIST","players":[]}"#)
            .await
            .unwrap();
        hub.shutdown();
    }

    #[tokio::test]
    async fn download_flow_reaches_only_requester() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (owner, mut owner_rx) = subscriber(&hub);
        let (_other, mut other_rx) = subscriber(&hub);

        route_text(&hub, &conn, &download_echo(&owner.id)).await.unwrap();
        assert_eq!(next_event(&mut owner_rx)["event"], "download started");

        route_binary(&hub, &conn, Bytes::from_static(b"0123456789")).unwrap();
        assert_eq!(
            owner_rx.try_recv().unwrap(),
            Frame::Binary(Bytes::from_static(b"0123456789"))
        );

        route_text(&hub, &conn, r#"{"kind":"END_OF_TRANSFER"}"#).await.unwrap();
        let done = next_event(&mut owner_rx);
        assert_eq!(done["event"], "transfer complete");
        assert_eq!(done["data"]["bytes"], 10);
        assert!(other_rx.try_recv().is_err());
        hub.shutdown();
    }

    #[tokio::test]
    async fn oversize_frame_is_never_forwarded() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (owner, mut owner_rx) = subscriber(&hub);
        route_text(&hub, &conn, &download_echo(&owner.id)).await.unwrap();
        let _ = next_event(&mut owner_rx);

        let big = Bytes::from(vec![0u8; LIMIT + 1]);
        let err = route_binary(&hub, &conn, big.clone()).unwrap_err();
        assert_matches!(err, GantryError::Capacity { size, limit: LIMIT } if size == LIMIT + 1);
        assert!(!err.is_fatal());
        assert_eq!(next_event(&mut owner_rx)["data"]["code"], "CAPACITY_EXCEEDED");
        assert!(conn.transfer().is_open());

        // A repeat aborts the transfer.
        let _ = route_binary(&hub, &conn, big).unwrap_err();
        assert!(!conn.transfer().is_open());
        assert_eq!(next_event(&mut owner_rx)["event"], "error");
        assert!(owner_rx.try_recv().is_err());
        hub.shutdown();
    }

    #[tokio::test]
    async fn slow_requester_gets_error_instead_of_completion() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        // Room for "download started" and one payload frame.
        let (owner, mut owner_rx) = subscriber_with_queue(&hub, 2);
        route_text(&hub, &conn, &download_echo(&owner.id)).await.unwrap();

        route_binary(&hub, &conn, Bytes::from_static(b"aaaa")).unwrap();
        route_binary(&hub, &conn, Bytes::from_static(b"bbbb")).unwrap();
        // Later frames are dropped even once the queue has room again.
        assert_eq!(next_event(&mut owner_rx)["event"], "download started");
        assert_eq!(
            owner_rx.try_recv().unwrap(),
            Frame::Binary(Bytes::from_static(b"aaaa"))
        );
        route_binary(&hub, &conn, Bytes::from_static(b"cccc")).unwrap();
        assert!(owner_rx.try_recv().is_err());

        route_text(&hub, &conn, r#"{"kind":"END_OF_TRANSFER"}"#).await.unwrap();
        let event = next_event(&mut owner_rx);
        assert_eq!(event["event"], "error");
        assert_eq!(event["data"]["code"], "UNDELIVERED");
        assert!(owner_rx.try_recv().is_err());
        assert!(!conn.transfer().is_open());
        assert!(!conn.is_closed());
        hub.shutdown();
    }

    #[tokio::test]
    async fn end_of_transfer_while_idle_is_fatal() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let err = route_text(&hub, &conn, r#"{"kind":"END_OF_TRANSFER"}"#)
            .await
            .unwrap_err();
        assert_matches!(err, GantryError::Protocol(ProtocolViolation::NoOpenTransfer));
        assert!(err.is_fatal());
        assert!(!conn.transfer().is_open());
        hub.shutdown();
    }

    #[tokio::test]
    async fn binary_while_idle_is_fatal() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let err = route_binary(&hub, &conn, Bytes::from_static(b"x")).unwrap_err();
        assert_matches!(err, GantryError::Protocol(ProtocolViolation::UnexpectedBinary));
        hub.shutdown();
    }

    #[tokio::test]
    async fn second_download_echo_is_busy() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (owner, mut owner_rx) = subscriber(&hub);
        route_text(&hub, &conn, &download_echo(&owner.id)).await.unwrap();
        let _ = next_event(&mut owner_rx);
        let err = route_text(&hub, &conn, &download_echo(&owner.id))
            .await
            .unwrap_err();
        assert_matches!(err, GantryError::TransferBusy);
        assert_eq!(next_event(&mut owner_rx)["data"]["code"], "TRANSFER_BUSY");
        hub.shutdown();
    }

    #[tokio::test]
    async fn routed_file_data_goes_to_requester() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (owner, mut owner_rx) = subscriber(&hub);
        let text = format!(
            r#"{{"kind":"FILE_DATA","file":{{"error":"No such file"}},"requester":"{}"}}"#,
            owner.id
        );
        route_text(&hub, &conn, &text).await.unwrap();
        let event = next_event(&mut owner_rx);
        assert_eq!(event["event"], "file data");
        assert_eq!(event["data"]["file"]["error"], "No such file");
        hub.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_timer_closes_agent() {
        let hub = hub();
        let (conn, _rx) = logged_in(&hub).await;
        let (owner, mut owner_rx) = subscriber(&hub);
        route_text(&hub, &conn, &download_echo(&owner.id)).await.unwrap();
        let _ = next_event(&mut owner_rx);

        // Keep the heartbeat satisfied while the transfer stalls.
        for _ in 0..31 {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            conn.mark_alive();
        }
        assert!(conn.is_closed());
        assert!(!hub.registry().is_online(&AgentId::from("srv")));
        let failure = next_event(&mut owner_rx);
        assert_eq!(failure["data"]["code"], "TIMEOUT");
        let offline = next_event(&mut owner_rx);
        assert_eq!(offline["event"], "status");
        assert_eq!(offline["data"]["online"], false);
    }
}
