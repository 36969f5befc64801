//! Subscriber request handling.
//!
//! Every request naming a server passes the capability check (room
//! membership or admin, then the permission bit for the action, then a fresh
//! directory check for root access) before the registry is consulted, so a
//! rejected subscriber never learns whether the agent is online.

use std::sync::Arc;

use bytes::Bytes;
use gantry_core::errors::{AuthFailure, GantryError};
use gantry_core::ids::AgentId;
use gantry_core::permissions::Permissions;
use gantry_core::protocol::{AgentMessage, MessageKind, ProtocolViolation, TransferRequest};
use metrics::{counter, histogram};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::commands::rewrite_command;
use super::events::{ConsoleLine, PanelEvent, PanelRequest, ServerSummary};
use super::session::{PanelSession, SessionIdentity};
use crate::agent::connection::AgentConnection;
use crate::agent::transfer::{self, FrameVerdict, TransferDirection};
use crate::hub::Hub;
use crate::metrics::{
    CORRELATED_REQUEST_DURATION_SECONDS, OVERSIZE_FRAMES_TOTAL, PANEL_REQUEST_ERRORS_TOTAL,
    PANEL_REQUESTS_TOTAL, TRANSFER_BYTES_TOTAL, TRANSFERS_COMPLETED_TOTAL,
};

/// History line returned for an offline server.
pub const OFFLINE_HISTORY_LINE: &str = "[Gantry] Server is currently offline!";

/// Handle one subscriber text frame.
///
/// Requests that wait on an agent reply run on their own task so the reader
/// keeps serving the session meanwhile.
pub async fn handle_text(hub: &Arc<Hub>, session: &Arc<PanelSession>, text: &str) {
    let request = match PanelRequest::parse(text) {
        Ok(request) => request,
        Err(err) => {
            report(session, &err, None);
            return;
        }
    };
    counter!(PANEL_REQUESTS_TOTAL, "event" => request.name()).increment(1);
    debug!(session_id = %session.id, event = request.name(), "panel request");

    if request.is_correlated() {
        let hub = hub.clone();
        let session = session.clone();
        drop(tokio::spawn(async move {
            run(&hub, &session, request).await;
        }));
    } else {
        run(hub, session, request).await;
    }
}

async fn run(hub: &Arc<Hub>, session: &Arc<PanelSession>, request: PanelRequest) {
    let target = request.server().map(AgentId::normalized);
    if let Err(err) = dispatch(hub, session, request).await {
        let server = match &err {
            GantryError::Auth(_) => None,
            _ => target,
        };
        report(session, &err, server);
    }
}

async fn dispatch(
    hub: &Arc<Hub>,
    session: &Arc<PanelSession>,
    request: PanelRequest,
) -> Result<(), GantryError> {
    match request {
        PanelRequest::Authenticate { token } => authenticate(hub, session, &token).await,
        PanelRequest::FetchLogHistory { server } => fetch_log_history(hub, session, &server).await,
        PanelRequest::ExecuteCommand { server, command } => {
            execute_command(hub, session, &server, &command).await
        }
        PanelRequest::GetFiles { server, path } => get_files(hub, session, &server, path).await,
        PanelRequest::GetAllFiles { server, path } => {
            get_all_files(hub, session, &server, path).await
        }
        PanelRequest::GetPlayers { server } => get_players(hub, session, &server).await,
        PanelRequest::DownloadFile { server, path, root } => {
            download_file(hub, session, &server, path, root).await
        }
        PanelRequest::UploadFile {
            server,
            path,
            replace,
            size,
            root,
        } => {
            let request = TransferRequest {
                path,
                replace,
                requester: session.id.clone(),
                root,
                size,
            };
            upload_file(hub, session, &server, request).await
        }
        PanelRequest::EndOfTransfer { server } => end_of_transfer(hub, session, &server),
    }
}

fn report(session: &PanelSession, err: &GantryError, server: Option<AgentId>) {
    counter!(PANEL_REQUEST_ERRORS_TOTAL, "code" => err.code()).increment(1);
    debug!(session_id = %session.id, code = err.code(), error = %err, "panel request failed");
    let _ = session.send_event(&PanelEvent::error(err, server));
}

/// Bind the account behind `token` and its room memberships to `session`.
pub async fn authenticate(
    hub: &Hub,
    session: &PanelSession,
    token: &str,
) -> Result<(), GantryError> {
    if token.is_empty() {
        return Err(AuthFailure::MissingToken.into());
    }
    let directory = hub.directory();
    let account = directory
        .account_by_token(token)
        .await?
        .ok_or(AuthFailure::InvalidToken)?;
    if account.suspended {
        return Err(AuthFailure::Suspended.into());
    }
    let servers = directory.servers_for_account(&account.id).await?;

    let mut summaries = Vec::with_capacity(servers.len());
    let mut rooms = std::collections::HashMap::with_capacity(servers.len());
    for server in &servers {
        let id = AgentId::normalized(&server.id);
        let _ = rooms.insert(id.clone(), server.permissions_for(&account.id));
        summaries.push(ServerSummary {
            online: hub.registry().is_online(&id),
            id,
            name: server.name.clone(),
        });
    }

    info!(
        session_id = %session.id,
        account_id = %account.id,
        rooms = rooms.len(),
        admin = account.admin,
        "subscriber authenticated"
    );
    session.bind(SessionIdentity {
        account: account.clone(),
        token: token.to_owned(),
        rooms,
    });
    let _ = session.send_event(&PanelEvent::Authenticated {
        id: account.id,
        tag: account.tag,
        admin: account.admin,
        servers: summaries,
    });
    Ok(())
}

/// Capability check for an action on `server`.
///
/// Order: authenticated, member (or admin), permission bit, then root access
/// re-validated against the directory. Never consults the registry.
pub async fn authorize(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
    needed: Permissions,
    root: bool,
) -> Result<(AgentId, SessionIdentity), GantryError> {
    let identity = session
        .identity()
        .ok_or(AuthFailure::NotAuthenticated)?;
    let agent = AgentId::normalized(server);
    if !identity.is_member(&agent) || !identity.permissions(&agent).contains(needed) {
        return Err(GantryError::Permission);
    }
    if root {
        verify_root_access(hub, &identity, &agent).await?;
    }
    Ok((agent, identity))
}

async fn verify_root_access(
    hub: &Hub,
    identity: &SessionIdentity,
    agent: &AgentId,
) -> Result<(), GantryError> {
    let directory = hub.directory();
    let account = directory
        .account_by_token(&identity.token)
        .await?
        .filter(|a| !a.suspended && a.id == identity.account.id)
        .ok_or(GantryError::Permission)?;
    if account.admin {
        return Ok(());
    }
    let server = directory
        .server(agent)
        .await?
        .ok_or(GantryError::Permission)?;
    if server
        .permissions_for(&account.id)
        .contains(Permissions::MANAGE_SERVER)
    {
        Ok(())
    } else {
        Err(GantryError::Permission)
    }
}

fn online(hub: &Hub, agent: &AgentId) -> Result<Arc<AgentConnection>, GantryError> {
    hub.agent(agent).ok_or(GantryError::Offline)
}

async fn round_trip(
    hub: &Hub,
    conn: &AgentConnection,
    message: &AgentMessage,
    expected: MessageKind,
) -> Result<AgentMessage, GantryError> {
    let started = Instant::now();
    let reply = conn
        .request_within(message, expected, hub.policy().transfer_timeout)
        .await;
    histogram!(CORRELATED_REQUEST_DURATION_SECONDS, "kind" => expected.as_str())
        .record(started.elapsed().as_secs_f64());
    Ok(reply?)
}

fn unexpected(reply: &AgentMessage) -> GantryError {
    GantryError::invalid(format!("unexpected {} reply from server", reply.kind()))
}

async fn fetch_log_history(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
) -> Result<(), GantryError> {
    let (agent, _) = authorize(hub, session, server, Permissions::VIEW_CONSOLE, false).await?;
    let Some(conn) = hub.agent(&agent) else {
        let line = ConsoleLine::now(OFFLINE_HISTORY_LINE, "ERROR");
        let _ = session.send_event(&PanelEvent::LogHistory {
            server: agent,
            logs: json!([line]),
        });
        return Ok(());
    };
    let reply = round_trip(
        hub,
        &conn,
        &AgentMessage::ConsoleHistory { history: None },
        MessageKind::ConsoleHistory,
    )
    .await?;
    let AgentMessage::ConsoleHistory { history } = reply else {
        return Err(unexpected(&reply));
    };
    let _ = session.send_event(&PanelEvent::LogHistory {
        server: agent,
        logs: history.unwrap_or_else(|| Value::Array(Vec::new())),
    });
    Ok(())
}

async fn execute_command(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
    command: &str,
) -> Result<(), GantryError> {
    let (agent, identity) =
        authorize(hub, session, server, Permissions::USE_CONSOLE, false).await?;
    let raw = command.trim();
    if raw.is_empty() {
        return Err(GantryError::invalid("command must not be empty"));
    }
    let conn = online(hub, &agent)?;
    let tag = identity.account.tag;
    let rewritten = rewrite_command(raw, &tag);
    if !conn.send_message(&AgentMessage::ExecuteCommand {
        command: rewritten,
        raw: raw.to_owned(),
        requester: tag.clone(),
    }) {
        warn!(agent_id = %agent, requester = %tag, "command dropped on a full agent queue");
        return Err(GantryError::Undelivered("command"));
    }
    let _ = hub.broadcast_console(
        &agent,
        ConsoleLine::now(format!("{tag} executed command {raw}"), "SYSTEM"),
    );
    info!(agent_id = %agent, requester = %tag, command = raw, "command relayed");
    Ok(())
}

async fn get_files(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
    path: String,
) -> Result<(), GantryError> {
    let (agent, _) = authorize(hub, session, server, Permissions::READ_FILES, false).await?;
    let conn = online(hub, &agent)?;
    let reply = round_trip(
        hub,
        &conn,
        &AgentMessage::FetchFile { path },
        MessageKind::FileData,
    )
    .await?;
    let AgentMessage::FileData { file, .. } = reply else {
        return Err(unexpected(&reply));
    };
    let _ = session.send_event(&PanelEvent::FileData {
        server: agent,
        file,
    });
    Ok(())
}

async fn get_all_files(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
    path: String,
) -> Result<(), GantryError> {
    let (agent, _) = authorize(hub, session, server, Permissions::READ_FILES, false).await?;
    let conn = online(hub, &agent)?;
    let reply = round_trip(
        hub,
        &conn,
        &AgentMessage::FetchAllFiles { path: path.clone() },
        MessageKind::AllFiles,
    )
    .await?;
    let AgentMessage::AllFiles { files } = reply else {
        return Err(unexpected(&reply));
    };
    let _ = session.send_event(&PanelEvent::AllFiles {
        server: agent,
        path,
        files,
    });
    Ok(())
}

async fn get_players(hub: &Hub, session: &PanelSession, server: &str) -> Result<(), GantryError> {
    let (agent, _) = authorize(hub, session, server, Permissions::MANAGE_PLAYERS, false).await?;
    let conn = online(hub, &agent)?;
    let reply = round_trip(hub, &conn, &AgentMessage::GetPlayers, MessageKind::PlayerList).await?;
    let AgentMessage::PlayerList { players } = reply else {
        return Err(unexpected(&reply));
    };
    let _ = session.send_event(&PanelEvent::Players {
        server: agent,
        players,
    });
    Ok(())
}

async fn download_file(
    hub: &Hub,
    session: &PanelSession,
    server: &str,
    path: String,
    root: bool,
) -> Result<(), GantryError> {
    let (agent, _) = authorize(hub, session, server, Permissions::READ_FILES, root).await?;
    let conn = online(hub, &agent)?;
    if conn.transfer().is_open() {
        return Err(GantryError::TransferBusy);
    }
    let sent = conn.send_message(&AgentMessage::DownloadFile(TransferRequest {
        path,
        replace: false,
        requester: session.id.clone(),
        root,
        size: None,
    }));
    if sent {
        Ok(())
    } else {
        Err(GantryError::Undelivered("download request"))
    }
}

async fn upload_file(
    hub: &Arc<Hub>,
    session: &PanelSession,
    server: &str,
    request: TransferRequest,
) -> Result<(), GantryError> {
    let (agent, _) =
        authorize(hub, session, server, Permissions::WRITE_FILES, request.root).await?;
    let conn = online(hub, &agent)?;
    if session.upload_target().is_some() {
        return Err(GantryError::TransferBusy);
    }
    let _ = transfer::begin(hub, &conn, TransferDirection::Upload, &request)?;
    if !conn.send_message(&AgentMessage::UploadFile(request.clone())) {
        let _ = conn
            .transfer()
            .abandon(TransferDirection::Upload, &session.id);
        return Err(GantryError::Undelivered("upload request"));
    }
    session.set_upload_target(Some(agent.clone()));
    let _ = session.send_event(&PanelEvent::UploadReady {
        server: agent,
        path: request.path,
    });
    Ok(())
}

/// Close this session's upload on `server`.
///
/// With no upload open this is reported to the subscriber only; the session
/// stays connected. An upload that lost frames is aborted on the agent
/// instead of completed.
fn end_of_transfer(hub: &Hub, session: &PanelSession, server: &str) -> Result<(), GantryError> {
    if session.identity().is_none() {
        return Err(AuthFailure::NotAuthenticated.into());
    }
    let agent = AgentId::normalized(server);
    if session.upload_target().as_ref() != Some(&agent) {
        return Err(ProtocolViolation::NoOpenTransfer.into());
    }
    session.set_upload_target(None);
    let conn = hub.agent(&agent).ok_or(GantryError::ConnectionClosed)?;
    let done = conn
        .transfer()
        .abandon(TransferDirection::Upload, &session.id)
        .ok_or(ProtocolViolation::NoOpenTransfer)?;

    if !done.is_intact() {
        warn!(agent_id = %agent, path = %done.path, lost = done.undelivered, "upload incomplete");
        let _ = conn.send_message(&AgentMessage::error(format!(
            "Upload of {} was aborted",
            done.path
        )));
        return Err(GantryError::Undelivered("upload data"));
    }
    if !conn.send_message(&AgentMessage::EndOfTransfer) {
        warn!(agent_id = %agent, path = %done.path, "end of transfer dropped on a full agent queue");
        return Err(GantryError::Undelivered("end of transfer"));
    }
    counter!(TRANSFERS_COMPLETED_TOTAL, "direction" => "upload").increment(1);
    debug!(agent_id = %agent, path = %done.path, bytes = done.bytes, "upload complete");
    let _ = session.send_event(&PanelEvent::TransferComplete {
        server: agent,
        path: done.path.clone(),
        bytes: done.bytes,
    });
    Ok(())
}

/// Handle one subscriber binary frame (upload payload).
pub fn handle_binary(hub: &Hub, session: &PanelSession, data: Bytes) {
    let Some(agent) = session.upload_target() else {
        report(session, &ProtocolViolation::UnexpectedBinary.into(), None);
        return;
    };
    let Some(conn) = hub.agent(&agent) else {
        session.set_upload_target(None);
        report(session, &GantryError::ConnectionClosed, Some(agent));
        return;
    };
    let policy = hub.policy();
    let size = data.len();
    let capacity = GantryError::Capacity {
        size,
        limit: policy.max_binary_frame,
    };
    match conn.transfer().check_frame(
        TransferDirection::Upload,
        size,
        policy.max_binary_frame,
        policy.max_frame_violations,
    ) {
        Ok(FrameVerdict::Forward { requester }) if requester == session.id => {
            if conn.send_binary(data) {
                counter!(TRANSFER_BYTES_TOTAL, "direction" => "upload").increment(size as u64);
            } else if conn.transfer().mark_undelivered(TransferDirection::Upload) {
                warn!(agent_id = %agent, "upload frame could not be delivered, discarding the rest");
                report(session, &GantryError::Undelivered("upload data"), Some(agent));
            }
        }
        Ok(FrameVerdict::Discarded) => {}
        Ok(FrameVerdict::Forward { .. }) => {
            report(session, &ProtocolViolation::UnexpectedBinary.into(), Some(agent));
        }
        Ok(FrameVerdict::Rejected { .. }) => {
            counter!(OVERSIZE_FRAMES_TOTAL).increment(1);
            report(session, &capacity, Some(agent));
        }
        Ok(FrameVerdict::Aborted(open)) => {
            counter!(OVERSIZE_FRAMES_TOTAL).increment(1);
            session.set_upload_target(None);
            let _ = conn.send_message(&AgentMessage::error(format!(
                "Upload of {} was aborted",
                open.path
            )));
            report(session, &capacity, Some(agent));
        }
        Err(violation) => {
            session.set_upload_target(None);
            report(session, &violation.into(), Some(agent));
        }
    }
}
