//! FTP control channel.
//!
//! One task per client reads CRLF command lines and answers on the same
//! socket. Login resolves the username to a live agent connection; every
//! filesystem command then goes through [`AgentFileSystem`]. Data
//! connections are passive only (`PASV`/`EPSV`) and carry listings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use gantry_core::ids::AgentId;
use gantry_server::Hub;
use gantry_server::metrics::{FTP_LOGINS_TOTAL, FTP_SESSIONS_TOTAL};
use gantry_settings::GantrySettings;
use metrics::counter;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, instrument, warn};

use crate::adapter::{AgentFileSystem, FileSystem, FsError};
use crate::listing;

/// Longest accepted command line.
const MAX_LINE: usize = 4096;

/// How long a passive listener waits for the client to connect.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply to a login naming a server whose agent is not connected.
pub const OFFLINE_REPLY: &str = "Server is not currently online";

/// FTP listener configuration.
#[derive(Clone, Debug)]
pub struct FtpConfig {
    /// Bind host.
    pub host: String,
    /// Control port (`0` picks one).
    pub port: u16,
    /// Address advertised in `PASV` replies.
    pub passive_host: Option<Ipv4Addr>,
    /// `220` greeting lines.
    pub greeting: Vec<String>,
    /// Deadline for each agent round trip.
    pub request_timeout: Duration,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            passive_host: None,
            greeting: vec!["Gantry".into()],
            request_timeout: gantry_core::constants::TRANSFER_TIMEOUT,
        }
    }
}

impl FtpConfig {
    /// Build from loaded settings.
    ///
    /// An unparseable passive host is logged and ignored.
    pub fn from_settings(settings: &GantrySettings) -> Self {
        let passive_host = settings.ftp.passive_host.as_deref().and_then(|host| {
            host.parse::<Ipv4Addr>()
                .map_err(|e| warn!(host, error = %e, "ignoring invalid ftp passive host"))
                .ok()
        });
        Self {
            host: settings.ftp.host.clone(),
            port: settings.ftp.port,
            passive_host,
            greeting: settings.ftp.greeting.clone(),
            request_timeout: settings.transfer.timeout(),
        }
    }
}

/// The FTP front end.
pub struct FtpServer {
    config: Arc<FtpConfig>,
    hub: Arc<Hub>,
}

impl FtpServer {
    /// Serve agents registered in `hub`.
    pub fn new(config: FtpConfig, hub: Arc<Hub>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
        }
    }

    /// Bind and accept clients until the hub shuts down.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "ftp server listening");

        let hub = self.hub.clone();
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            let closing = hub.closing();
            loop {
                tokio::select! {
                    () = closing.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            drop(tokio::spawn(run_session(stream, peer, hub.clone(), config.clone())));
                        }
                        Err(e) => warn!(error = %e, "ftp accept failed"),
                    },
                }
            }
            debug!("ftp accept loop stopped");
        });
        Ok((local_addr, handle))
    }
}

/// Reply writer for one control connection.
struct Control {
    writer: OwnedWriteHalf,
}

impl Control {
    async fn reply(&mut self, code: u16, text: &str) -> std::io::Result<()> {
        self.writer
            .write_all(format!("{code} {text}\r\n").as_bytes())
            .await
    }

    async fn reply_lines(&mut self, code: u16, lines: &[String], last: &str) -> std::io::Result<()> {
        let mut out = String::new();
        for line in lines {
            out.push_str(&format!("{code}-{line}\r\n"));
        }
        out.push_str(&format!("{code} {last}\r\n"));
        self.writer.write_all(out.as_bytes()).await
    }

    async fn fs_error(&mut self, err: &FsError) -> std::io::Result<()> {
        self.reply(err.reply_code(), &format!("[Gantry] {err}")).await
    }
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Per-client state.
struct Session {
    hub: Arc<Hub>,
    config: Arc<FtpConfig>,
    local_ip: IpAddr,
    user: Option<String>,
    fs: Option<AgentFileSystem>,
    passive: Option<TcpListener>,
    rename_from: Option<String>,
}

#[instrument(skip_all, fields(peer = %peer))]
async fn run_session(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>, config: Arc<FtpConfig>) {
    counter!(FTP_SESSIONS_TOTAL).increment(1);
    let local_ip = match stream.local_addr() {
        Ok(addr) => addr.ip(),
        Err(e) => {
            debug!(error = %e, "ftp client vanished before greeting");
            return;
        }
    };
    let (read, writer) = stream.into_split();
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE));
    let mut control = Control { writer };
    let closing = hub.closing();
    let mut session = Session {
        hub,
        config,
        local_ip,
        user: None,
        fs: None,
        passive: None,
        rename_from: None,
    };

    let result = async {
        greet(&mut control, &session.config.greeting).await?;
        loop {
            tokio::select! {
                () = closing.cancelled() => {
                    control.reply(421, "Server shutting down").await?;
                    break;
                }
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        if session.handle(&mut control, &line).await? == Flow::Quit {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        control.reply(500, "Command line too long").await?;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                    None => break,
                },
            }
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = result {
        debug!(error = %e, "ftp control connection failed");
    }
    debug!("ftp client disconnected");
}

async fn greet(control: &mut Control, greeting: &[String]) -> std::io::Result<()> {
    match greeting.split_last() {
        Some((last, rest)) => control.reply_lines(220, rest, last).await,
        None => control.reply(220, "Gantry FTP").await,
    }
}

/// Split `VERB args` into an uppercased verb and trimmed arguments.
fn parse_command(line: &str) -> (String, &str) {
    let line = line.trim();
    match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// Path argument of `LIST`/`NLST`, ignoring `ls`-style flags.
fn list_target(arg: &str) -> &str {
    arg.split_whitespace()
        .find(|part| !part.starts_with('-'))
        .unwrap_or(".")
}

fn pasv_reply(ip: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = ip.octets();
    format!(
        "Entering Passive Mode ({a},{b},{c},{d},{},{})",
        port >> 8,
        port & 0xff
    )
}

impl Session {
    async fn handle(&mut self, control: &mut Control, line: &str) -> std::io::Result<Flow> {
        let (verb, arg) = parse_command(line);
        debug!(verb = %verb, "ftp command");
        match verb.as_str() {
            "USER" => {
                self.user = Some(arg.to_owned());
                self.fs = None;
                control.reply(331, &format!("Password required for {arg}")).await?;
            }
            "PASS" => self.login(control, arg).await?,
            "QUIT" => {
                control.reply(221, "Goodbye").await?;
                return Ok(Flow::Quit);
            }
            "SYST" => control.reply(215, "UNIX Type: L8").await?,
            "FEAT" => {
                let lines: Vec<String> = ["Features:", " EPSV", " PASV", " SIZE", " UTF8"]
                    .into_iter()
                    .map(String::from)
                    .collect();
                control.reply_lines(211, &lines, "End").await?;
            }
            "NOOP" => control.reply(200, "OK").await?,
            "TYPE" => control.reply(200, &format!("Type set to {arg}")).await?,
            "OPTS" if arg.to_ascii_uppercase().starts_with("UTF8") => {
                control.reply(200, "UTF8 mode enabled").await?;
            }
            _ if self.fs.is_none() => {
                control.reply(530, "Please login with USER and PASS").await?;
            }
            _ => self.handle_authenticated(control, &verb, arg).await?,
        }
        Ok(Flow::Continue)
    }

    async fn login(&mut self, control: &mut Control, password: &str) -> std::io::Result<()> {
        let Some(user) = self.user.take() else {
            return control.reply(503, "Login with USER first").await;
        };
        let agent = AgentId::normalized(&user);
        let Some(conn) = self.hub.agent(&agent) else {
            counter!(FTP_LOGINS_TOTAL, "result" => "offline").increment(1);
            return control.reply(530, OFFLINE_REPLY).await;
        };
        let accepted = conn
            .server()
            .and_then(|server| server.ftp_password)
            .is_some_and(|expected| !expected.is_empty() && expected == password);
        if !accepted {
            counter!(FTP_LOGINS_TOTAL, "result" => "rejected").increment(1);
            return control.reply(530, "Invalid username or password").await;
        }

        counter!(FTP_LOGINS_TOTAL, "result" => "ok").increment(1);
        let name = conn.server_name().unwrap_or_else(|| agent.to_string());
        info!(agent_id = %agent, "ftp login");
        self.fs = Some(AgentFileSystem::new(conn, &name, self.config.request_timeout));
        control.reply(230, "Logged in").await
    }

    async fn handle_authenticated(
        &mut self,
        control: &mut Control,
        verb: &str,
        arg: &str,
    ) -> std::io::Result<()> {
        let Some(fs) = self.fs.as_mut() else {
            return control.reply(530, "Please login with USER and PASS").await;
        };
        match verb {
            "PWD" | "XPWD" => {
                control
                    .reply(257, &format!("\"{}\" is the current directory", fs.current_directory()))
                    .await
            }
            "CWD" | "XCWD" | "CDUP" | "XCUP" => {
                let target = if verb.ends_with("UP") { ".." } else { arg };
                match fs.chdir(target).await {
                    Ok(cwd) => control.reply(250, &format!("\"{cwd}\" is the current directory")).await,
                    Err(err) => control.fs_error(&err).await,
                }
            }
            "SIZE" => match fs.get(arg).await {
                Ok(stat) if stat.is_dir() => control.reply(550, "Not a plain file").await,
                Ok(stat) => control.reply(213, &stat.size.to_string()).await,
                Err(err) => control.fs_error(&err).await,
            },
            "STAT" if arg.is_empty() => {
                let cwd = fs.current_directory().to_owned();
                control.reply(211, &format!("Gantry FTP, working directory {cwd}")).await
            }
            "STAT" => {
                let entries = match fs.get(arg).await {
                    Ok(stat) if stat.is_dir() => fs.list(arg).await,
                    Ok(stat) => Ok(vec![stat]),
                    Err(err) => Err(err),
                };
                match entries {
                    Ok(entries) => {
                        let mut lines = vec![format!("Status of {arg}:")];
                        lines.extend(listing::format_listing(&entries, Utc::now()));
                        control.reply_lines(213, &lines, "End of status").await
                    }
                    Err(err) => control.fs_error(&err).await,
                }
            }
            "LIST" | "NLST" => {
                let entries = match fs.list(list_target(arg)).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        self.passive = None;
                        return control.fs_error(&err).await;
                    }
                };
                let lines = if verb == "LIST" {
                    listing::format_listing(&entries, Utc::now())
                } else {
                    listing::format_names(&entries)
                };
                self.send_data(control, &lines).await
            }
            "RETR" => {
                let err = fs.read(arg).await.err().unwrap_or(FsError::NotPermitted);
                self.passive = None;
                control.fs_error(&err).await
            }
            "STOR" | "APPE" | "STOU" => {
                let path = if verb == "STOU" { fs.unique_name(arg) } else { arg.to_owned() };
                let err = fs.write(&path, &[]).await.err().unwrap_or(FsError::NotPermitted);
                self.passive = None;
                control.fs_error(&err).await
            }
            "DELE" | "RMD" | "XRMD" => match fs.delete(arg).await {
                Ok(()) => control.reply(250, "Deleted").await,
                Err(err) => control.fs_error(&err).await,
            },
            "MKD" | "XMKD" => match fs.mkdir(arg).await {
                Ok(()) => control.reply(257, &format!("\"{arg}\" created")).await,
                Err(err) => control.fs_error(&err).await,
            },
            "RNFR" => {
                self.rename_from = Some(arg.to_owned());
                control.reply(350, "Ready for RNTO").await
            }
            "RNTO" => {
                let Some(from) = self.rename_from.take() else {
                    return control.reply(503, "RNFR required first").await;
                };
                match fs.rename(&from, arg).await {
                    Ok(()) => control.reply(250, "Renamed").await,
                    Err(err) => control.fs_error(&err).await,
                }
            }
            "SITE" => {
                let mut parts = arg.splitn(3, ' ');
                match (parts.next().map(str::to_ascii_uppercase).as_deref(), parts.next(), parts.next()) {
                    (Some("CHMOD"), Some(mode), Some(path)) => match fs.chmod(path, mode).await {
                        Ok(()) => control.reply(200, "Mode changed").await,
                        Err(err) => control.fs_error(&err).await,
                    },
                    _ => control.reply(502, "SITE command not implemented").await,
                }
            }
            "PASV" => self.open_passive(control, false).await,
            "EPSV" => self.open_passive(control, true).await,
            _ => control.reply(502, "Command not implemented").await,
        }
    }

    async fn open_passive(&mut self, control: &mut Control, extended: bool) -> std::io::Result<()> {
        let listener = match TcpListener::bind((self.local_ip, 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "could not open passive listener");
                return control.reply(425, "Can't open data connection").await;
            }
        };
        let port = listener.local_addr()?.port();
        if extended {
            self.passive = Some(listener);
            return control
                .reply(229, &format!("Entering Extended Passive Mode (|||{port}|)"))
                .await;
        }
        let advertised = self.config.passive_host.or(match self.local_ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(ip) => ip.to_ipv4_mapped(),
        });
        let Some(ip) = advertised else {
            return control.reply(425, "PASV needs an IPv4 address; use EPSV").await;
        };
        self.passive = Some(listener);
        control.reply(227, &pasv_reply(ip, port)).await
    }

    async fn send_data(&mut self, control: &mut Control, lines: &[String]) -> std::io::Result<()> {
        let Some(listener) = self.passive.take() else {
            return control.reply(425, "Use PASV or EPSV first").await;
        };
        control.reply(150, "Opening data connection").await?;
        let mut stream = match tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                debug!(error = %e, "data connection failed");
                return control.reply(425, "Can't open data connection").await;
            }
            Err(_) => return control.reply(425, "Data connection timed out").await,
        };
        let mut body = String::new();
        for line in lines {
            body.push_str(line);
            body.push_str("\r\n");
        }
        let written = async {
            stream.write_all(body.as_bytes()).await?;
            stream.shutdown().await
        }
        .await;
        match written {
            Ok(()) => control.reply(226, "Transfer complete").await,
            Err(e) => {
                debug!(error = %e, "data connection write failed");
                control.reply(426, "Connection closed; transfer aborted").await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::directory::{MemoryDirectory, ServerRecord};
    use gantry_core::ids::AccountId;
    use gantry_core::protocol::{AgentMessage, FileEntry};
    use gantry_server::frame::Frame;
    use gantry_server::{AgentConnection, ServerConfig};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::sync::mpsc;

    struct Client {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> (Self, String) {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read, writer) = stream.into_split();
            let mut client = Self {
                reader: BufReader::new(read),
                writer,
            };
            let greeting = client.read_reply().await;
            (client, greeting)
        }

        /// Read one (possibly multi-line) reply; returns the full text.
        async fn read_reply(&mut self) -> String {
            let mut all = String::new();
            loop {
                let mut line = String::new();
                let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                    .await
                    .unwrap()
                    .unwrap();
                assert!(read > 0, "control connection closed");
                all.push_str(&line);
                let bytes = line.as_bytes();
                if bytes.len() >= 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b' ' {
                    return all;
                }
            }
        }

        async fn cmd(&mut self, line: &str) -> String {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
            self.read_reply().await
        }

        async fn login(&mut self) {
            assert!(self.cmd("USER LOBBY1").await.starts_with("331"));
            assert!(self.cmd("PASS hunter2").await.starts_with("230"));
        }

        async fn passive_data(&mut self) -> TcpStream {
            let reply = self.cmd("EPSV").await;
            assert!(reply.starts_with("229"), "{reply}");
            let port: u16 = reply
                .split("|||")
                .nth(1)
                .and_then(|rest| rest.split('|').next())
                .unwrap()
                .parse()
                .unwrap();
            TcpStream::connect(("127.0.0.1", port)).await.unwrap()
        }
    }

    fn spawn_agent(conn: Arc<AgentConnection>, mut rx: mpsc::Receiver<Frame>) {
        drop(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Frame::Text(text) = frame else { continue };
                let reply = match AgentMessage::parse(&text).unwrap() {
                    AgentMessage::Ping => {
                        conn.mark_alive();
                        continue;
                    }
                    AgentMessage::FetchAllFiles { .. } => AgentMessage::AllFiles {
                        files: vec![
                            FileEntry {
                                name: "/plugins".into(),
                                directory: true,
                                size: None,
                            },
                            FileEntry {
                                name: "/server.jar".into(),
                                directory: false,
                                size: Some(42),
                            },
                            FileEntry {
                                name: "/__resources".into(),
                                directory: true,
                                size: None,
                            },
                        ],
                    },
                    AgentMessage::FetchFile { path } => AgentMessage::FileData {
                        file: serde_json::json!({ "name": path }),
                        requester: None,
                    },
                    _ => continue,
                };
                let _ = conn.correlator().resolve(reply);
            }
        }));
    }

    async fn start(agent_online: bool) -> (Arc<Hub>, SocketAddr) {
        let directory = MemoryDirectory::new().with_server(
            "agent-token",
            ServerRecord {
                id: AgentId::from("lobby1"),
                name: "lobby".into(),
                owner: AccountId::from("owner"),
                suspended: false,
                users: vec![],
                ftp_password: Some("hunter2".into()),
            },
        );
        let hub = Arc::new(Hub::new(Arc::new(directory), &ServerConfig::default()));
        if agent_online {
            let (tx, rx) = mpsc::channel(64);
            let conn = Arc::new(AgentConnection::new(tx));
            let _ = hub.login(&conn, "agent-token").await.unwrap();
            spawn_agent(conn, rx);
        }
        let server = FtpServer::new(
            FtpConfig {
                greeting: vec!["Gantry".into(), "Welcome".into()],
                ..FtpConfig::default()
            },
            hub.clone(),
        );
        let (addr, _handle) = server.listen().await.unwrap();
        (hub, addr)
    }

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("user Lobby1\r"), ("USER".to_string(), "Lobby1"));
        assert_eq!(parse_command("PWD"), ("PWD".to_string(), ""));
        assert_eq!(list_target("-la /plugins"), "/plugins");
        assert_eq!(list_target("-a"), ".");
        assert_eq!(
            pasv_reply(Ipv4Addr::new(10, 0, 0, 1), 50_000),
            "Entering Passive Mode (10,0,0,1,195,80)"
        );
    }

    #[tokio::test]
    async fn greeting_is_multiline() {
        let (hub, addr) = start(false).await;
        let (_client, greeting) = Client::connect(addr).await;
        assert_eq!(greeting, "220-Gantry\r\n220 Welcome\r\n");
        hub.shutdown();
    }

    #[tokio::test]
    async fn offline_server_is_refused() {
        let (hub, addr) = start(false).await;
        let (mut client, _) = Client::connect(addr).await;
        let _ = client.cmd("USER lobby1").await;
        assert_eq!(client.cmd("PASS hunter2").await, format!("530 {OFFLINE_REPLY}\r\n"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn wrong_password_is_refused() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        let _ = client.cmd("USER lobby1").await;
        assert!(client.cmd("PASS nope").await.starts_with("530"));
        assert!(client.cmd("PWD").await.starts_with("530"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn login_then_navigate() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        assert_eq!(client.cmd("PWD").await, "257 \"/lobby\" is the current directory\r\n");
        assert!(client.cmd("CWD plugins").await.starts_with("250 \"/lobby/plugins\""));
        assert!(client.cmd("CDUP").await.starts_with("250 \"/lobby\""));
        assert!(client.cmd("CWD server.jar").await.starts_with("550"));
        assert_eq!(client.cmd("SIZE server.jar").await, "213 42\r\n");
        assert!(client.cmd("QUIT").await.starts_with("221"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn list_over_passive_connection() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        let mut data = client.passive_data().await;
        assert!(client.cmd("LIST -la").await.starts_with("150"));
        let mut body = String::new();
        let _ = data.read_to_string(&mut body).await.unwrap();
        assert!(client.read_reply().await.starts_with("226"));

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('d') && lines[0].ends_with(" plugins"));
        assert!(lines[1].starts_with('-') && lines[1].ends_with(" server.jar"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn nlst_lists_names() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        let mut data = client.passive_data().await;
        assert!(client.cmd("NLST").await.starts_with("150"));
        let mut body = String::new();
        let _ = data.read_to_string(&mut body).await.unwrap();
        assert!(client.read_reply().await.starts_with("226"));
        assert_eq!(body, "plugins\r\nserver.jar\r\n");
        hub.shutdown();
    }

    #[tokio::test]
    async fn list_without_passive_is_refused() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        assert!(client.cmd("LIST").await.starts_with("425"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn stat_answers_inline() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        let reply = client.cmd("STAT /").await;
        assert!(reply.starts_with("213-Status of /:"));
        assert!(reply.contains(" plugins\r\n"));
        assert!(!reply.contains("__resources"));
        assert!(reply.ends_with("213 End of status\r\n"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn content_commands_are_refused() {
        let (hub, addr) = start(true).await;
        let (mut client, _) = Client::connect(addr).await;
        client.login().await;
        assert!(client.cmd("RETR server.jar").await.starts_with("550 [Gantry]"));
        assert!(client.cmd("STOR new.txt").await.starts_with("550"));
        assert!(client.cmd("DELE server.jar").await.starts_with("550"));
        assert!(client.cmd("MKD world").await.starts_with("550"));
        assert!(client.cmd("SITE CHMOD 755 server.jar").await.starts_with("550"));
        assert!(client.cmd("RNFR server.jar").await.starts_with("350"));
        assert!(client.cmd("RNTO old.jar").await.starts_with("550"));
        assert!(client.cmd("RNTO old.jar").await.starts_with("503"));
        assert!(client.cmd("MDTM server.jar").await.starts_with("502"));
        hub.shutdown();
    }
}
