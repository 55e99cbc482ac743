use crate::constants::{limits, network};
use crate::errors::{CoreError, CONNECTION_LOST_PREFIX};
use crate::services::config::{ServerConfig, SshCredential, SshEndpoint};
use crate::services::logger::Logger;
use crate::services::transport::{CommandResult, RemoteFileStat, RemoteTransport};
use crate::utils::text::truncate_utf8_prefix;
use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use ssh2::{Channel, OpenFlags, OpenType, Session, Sftp};
use std::fs;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_CONNECTION: i32 = 6;
const SFTP_CONNECTION_LOST: i32 = 7;
const LIBSSH2_TRANSPORT_LOSS: &[i32] = &[-1, -7, -13, -43, -45];

/// Live transport: the authenticated session plus the lazily opened SFTP channel.
struct Connection {
    endpoint: String,
    session: Session,
    sftp: Option<Sftp>,
}

impl Connection {
    fn sftp(&mut self) -> Result<&Sftp, CoreError> {
        if self.sftp.is_none() {
            let sftp = self
                .session
                .sftp()
                .map_err(|err| session_fault(&self.endpoint, err))?;
            self.sftp = Some(sftp);
        }
        self.sftp
            .as_ref()
            .ok_or_else(|| CoreError::Internal("SFTP channel unavailable".to_string()))
    }

    /// Channel first, then the connection. Errors from either are ignored.
    fn close(mut self) {
        drop(self.sftp.take());
        let _ = self.session.disconnect(None, "proxmox-mcp shutting down", None);
    }
}

/// Owner of the single SSH connection to the Proxmox host.
///
/// All remote work goes through [`SshSession::with_connection`], which holds the session
/// mutex for the whole blocking operation; at most one operation is in flight at a time.
#[derive(Clone)]
pub struct SshSession {
    endpoint: SshEndpoint,
    credential: SshCredential,
    logger: Logger,
    state: Arc<Mutex<Option<Connection>>>,
    connected: Arc<AtomicBool>,
}

impl SshSession {
    pub fn new(config: &ServerConfig, logger: Logger) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            credential: config.credential.clone(),
            logger: logger.child("ssh"),
            state: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds the session and opens the connection.
    pub async fn connect(config: &ServerConfig, logger: Logger) -> Result<Self, CoreError> {
        let session = Self::new(config, logger);
        session.open().await?;
        Ok(session)
    }

    /// Opens the connection if none exists. A live connection is kept as is.
    pub async fn open(&self) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.open_blocking().await?);
        self.connected.store(true, Ordering::SeqCst);
        self.logger.info(
            "Connected to Proxmox host",
            Some(&serde_json::json!({
                "endpoint": self.endpoint.address(),
                "user": self.endpoint.username,
                "auth": self.credential.method(),
            })),
        );
        Ok(())
    }

    async fn open_blocking(&self) -> Result<Connection, CoreError> {
        let endpoint = self.endpoint.clone();
        let credential = self.credential.clone();
        tokio::task::spawn_blocking(move || open_connection(&endpoint, &credential))
            .await
            .map_err(|_| CoreError::Internal("SSH connect task failed".to_string()))?
    }

    async fn close_locked(&self, guard: &mut Option<Connection>) {
        let was_open = guard.is_some();
        if let Some(connection) = guard.take() {
            let _ = tokio::task::spawn_blocking(move || connection.close()).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        if was_open {
            self.logger.info(
                "Disconnected from Proxmox host",
                Some(&serde_json::json!({ "endpoint": self.endpoint.address() })),
            );
        }
    }

    /// Runs `op` on the blocking pool with exclusive access to the connection.
    ///
    /// Fails fast with `NotConnected` when there is no connection. A fault that means the
    /// transport went away drops the connection; only an explicit reconnect restores it.
    async fn with_connection<F, T>(&self, op: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.state.clone().lock_owned().await;
        if guard.is_none() {
            return Err(CoreError::NotConnected);
        }
        let connected = self.connected.clone();
        let logger = self.logger.clone();
        tokio::task::spawn_blocking(move || {
            let connection = guard.as_mut().ok_or(CoreError::NotConnected)?;
            let result = op(connection);
            if let Err(err) = &result {
                if err.invalidates_session() {
                    logger.error(
                        "SSH transport lost; session invalidated until reconnect",
                        Some(&serde_json::json!({ "error": err.to_string() })),
                    );
                    if let Some(connection) = guard.take() {
                        connection.close();
                    }
                    connected.store(false, Ordering::SeqCst);
                }
            }
            result
        })
        .await
        .map_err(|_| CoreError::Internal("SSH task failed".to_string()))?
    }
}

#[async_trait]
impl RemoteTransport for SshSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn describe(&self) -> Value {
        serde_json::json!({
            "endpoint": self.endpoint.address(),
            "user": self.endpoint.username,
            "auth": self.credential.method(),
            "host_key_pinned": self.endpoint.host_key_fingerprint.is_some(),
            "ssh_connected": self.is_connected(),
        })
    }

    /// Closes the SFTP channel, then the connection.
    async fn disconnect(&self) {
        let mut guard = self.state.lock().await;
        self.close_locked(&mut guard).await;
    }

    /// Full disconnect followed by a fresh connect, under one lock acquisition.
    async fn reconnect(&self) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        self.close_locked(&mut guard).await;
        *guard = Some(self.open_blocking().await?);
        self.connected.store(true, Ordering::SeqCst);
        self.logger.info(
            "Reconnected to Proxmox host",
            Some(&serde_json::json!({ "endpoint": self.endpoint.address() })),
        );
        Ok(())
    }

    async fn execute(&self, command: &str, timeout: Duration) -> Result<CommandResult, CoreError> {
        self.logger.debug(
            "exec",
            Some(&serde_json::json!({
                "command": truncate_utf8_prefix(command, limits::COMMAND_LOG_PREFIX),
                "timeout_ms": timeout.as_millis() as u64,
            })),
        );
        let command = command.to_string();
        let result = self
            .with_connection(move |connection| run_command(connection, &command, timeout))
            .await?;
        if result.timed_out {
            self.logger.warn(
                "Command timed out; remote process left to finish on its own",
                Some(&serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 })),
            );
        }
        Ok(result)
    }

    async fn stat(&self, remote_path: &str) -> Result<RemoteFileStat, CoreError> {
        let remote_path = remote_path.to_string();
        self.with_connection(move |connection| {
            let endpoint = connection.endpoint.clone();
            let stat = connection
                .sftp()?
                .stat(Path::new(&remote_path))
                .map_err(|err| sftp_fault(&endpoint, &remote_path, err))?;
            Ok(RemoteFileStat {
                size: stat.size.unwrap_or(0),
                mode: stat.perm.map(|perm| perm & 0o7777),
            })
        })
        .await
    }

    async fn upload(&self, local_path: PathBuf, remote_path: &str) -> Result<u64, CoreError> {
        let remote_path = remote_path.to_string();
        self.with_connection(move |connection| {
            let endpoint = connection.endpoint.clone();
            let mut local = fs::File::open(&local_path).map_err(|err| match err.kind() {
                ErrorKind::NotFound => CoreError::SourceNotFound {
                    path: local_path.display().to_string(),
                },
                _ => CoreError::transfer_io(local_path.display().to_string(), err),
            })?;
            let mut remote = connection
                .sftp()?
                .open_mode(
                    Path::new(&remote_path),
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    0o600,
                    OpenType::File,
                )
                .map_err(|err| sftp_fault(&endpoint, &remote_path, err))?;
            std::io::copy(&mut local, &mut remote).map_err(|err| copy_fault(&remote_path, err))
        })
        .await
    }

    async fn download(&self, remote_path: &str, local_path: PathBuf) -> Result<u64, CoreError> {
        let remote_path = remote_path.to_string();
        self.with_connection(move |connection| {
            let endpoint = connection.endpoint.clone();
            let mut remote = connection
                .sftp()?
                .open(Path::new(&remote_path))
                .map_err(|err| sftp_fault(&endpoint, &remote_path, err))?;
            let mut local = fs::File::create(&local_path)
                .map_err(|err| CoreError::transfer_io(local_path.display().to_string(), err))?;
            let written =
                std::io::copy(&mut remote, &mut local).map_err(|err| copy_fault(&remote_path, err))?;
            local
                .sync_all()
                .map_err(|err| CoreError::transfer_io(local_path.display().to_string(), err))?;
            Ok(written)
        })
        .await
    }

    async fn remove(&self, remote_path: &str) -> Result<(), CoreError> {
        let remote_path = remote_path.to_string();
        self.with_connection(move |connection| {
            let endpoint = connection.endpoint.clone();
            match connection.sftp()?.unlink(Path::new(&remote_path)) {
                Ok(()) => Ok(()),
                Err(err) if err.code() == ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(()),
                Err(err) => Err(sftp_fault(&endpoint, &remote_path, err)),
            }
        })
        .await
    }
}

fn open_connection(
    endpoint: &SshEndpoint,
    credential: &SshCredential,
) -> Result<Connection, CoreError> {
    let address = endpoint.address();
    let fail = |reason: String| CoreError::Connection {
        endpoint: address.clone(),
        reason,
    };
    let timeout = Duration::from_millis(endpoint.connect_timeout_ms);

    let socket = address
        .to_socket_addrs()
        .map_err(|err| fail(format!("cannot resolve host: {}", err)))?
        .next()
        .ok_or_else(|| fail("host resolved to no addresses".to_string()))?;
    let tcp = TcpStream::connect_timeout(&socket, timeout)
        .map_err(|err| fail(format!("TCP connect failed: {}", err)))?;

    let mut session =
        Session::new().map_err(|err| fail(format!("cannot create SSH session: {}", err)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(endpoint.connect_timeout_ms.min(u32::MAX as u64) as u32);
    session
        .handshake()
        .map_err(|err| fail(format!("SSH handshake failed: {}", err)))?;

    if let Some(expected) = endpoint.host_key_fingerprint.as_ref() {
        let observed = fingerprint_host_key_sha256(&session);
        if observed.as_ref() != Some(expected) {
            return Err(fail(format!(
                "host key mismatch (expected {}, got {})",
                expected,
                observed.unwrap_or_else(|| "unknown".to_string())
            )));
        }
    }

    let auth = match credential {
        SshCredential::PrivateKey { path, passphrase } => session.userauth_pubkey_file(
            &endpoint.username,
            None,
            path,
            passphrase.as_deref(),
        ),
        SshCredential::Password(password) => {
            session.userauth_password(&endpoint.username, password)
        }
    };
    auth.map_err(|err| fail(format!("authentication rejected: {}", err)))?;
    if !session.authenticated() {
        return Err(fail("authentication rejected".to_string()));
    }

    session.set_timeout(0);
    session.set_keepalive(true, network::KEEPALIVE_INTERVAL_SECS);

    Ok(Connection {
        endpoint: address,
        session,
        sftp: None,
    })
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

/// Bounded accumulation of one output stream.
struct Capture {
    buffer: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl Capture {
    fn new(max: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let remaining = self.max.saturating_sub(self.buffer.len());
        if chunk.len() > remaining {
            self.truncated = true;
        }
        self.buffer
            .extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}

/// Switches the session to non-blocking mode for the lifetime of the guard.
struct NonBlocking<'a>(&'a Session);

impl<'a> NonBlocking<'a> {
    fn enter(session: &'a Session) -> Self {
        session.set_blocking(false);
        Self(session)
    }
}

impl Drop for NonBlocking<'_> {
    fn drop(&mut self) {
        self.0.set_blocking(true);
    }
}

fn pump(read: std::io::Result<usize>, buf: &[u8], capture: &mut Capture) -> std::io::Result<bool> {
    match read {
        Ok(0) => Ok(false),
        Ok(n) => {
            capture.push(&buf[..n]);
            Ok(true)
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(err),
    }
}

/// Both output streams of one exec channel, as seen by the poll loop.
trait ExecStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn at_eof(&self) -> bool;
    /// Stop waiting on the remote side. The remote process is left running.
    fn abandon(&mut self);
}

struct ChannelStreams<'a> {
    channel: &'a mut Channel,
    stderr: ssh2::Stream,
}

impl ExecStreams for ChannelStreams<'_> {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.channel.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr.read(buf)
    }

    fn at_eof(&self) -> bool {
        self.channel.eof()
    }

    fn abandon(&mut self) {
        let _ = self.channel.close();
    }
}

/// Reads both streams until EOF or the deadline. Returns `true` when the deadline won;
/// read errors carry the name of the failing stream.
fn drain_streams(
    streams: &mut impl ExecStreams,
    started: Instant,
    timeout: Duration,
    stdout: &mut Capture,
    stderr: &mut Capture,
) -> Result<bool, (&'static str, std::io::Error)> {
    let mut buf = [0u8; 8192];
    loop {
        let read = streams.read_stdout(&mut buf);
        let mut progressed = pump(read, &buf, stdout).map_err(|err| ("stdout", err))?;
        let read = streams.read_stderr(&mut buf);
        progressed |= pump(read, &buf, stderr).map_err(|err| ("stderr", err))?;
        if streams.at_eof() {
            return Ok(false);
        }
        if started.elapsed() >= timeout {
            streams.abandon();
            return Ok(true);
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(network::EXEC_POLL_INTERVAL_MS));
        }
    }
}

fn run_command(
    connection: &mut Connection,
    command: &str,
    timeout: Duration,
) -> Result<CommandResult, CoreError> {
    let endpoint = connection.endpoint.clone();
    let started = Instant::now();
    let mut channel = connection
        .session
        .channel_session()
        .map_err(|err| session_fault(&endpoint, err))?;
    channel
        .exec(command)
        .map_err(|err| session_fault(&endpoint, err))?;

    let mut stdout = Capture::new(limits::MAX_CAPTURE_BYTES);
    let mut stderr = Capture::new(limits::MAX_CAPTURE_BYTES);
    let timed_out = {
        let _mode = NonBlocking::enter(&connection.session);
        let stderr_stream = channel.stderr();
        let mut streams = ChannelStreams {
            channel: &mut channel,
            stderr: stderr_stream,
        };
        drain_streams(&mut streams, started, timeout, &mut stdout, &mut stderr)
            .map_err(|(stream, err)| stream_fault(&endpoint, stream, err))?
    };

    let exit_code = if timed_out {
        -1
    } else {
        // exit-status arrives between EOF and channel close; wait for the close to read it.
        let remaining = timeout
            .saturating_sub(started.elapsed())
            .max(Duration::from_millis(network::TIMEOUT_SSH_EXEC_HARD_GRACE_MS));
        connection
            .session
            .set_timeout(remaining.as_millis().min(u32::MAX as u128) as u32);
        let closed = channel.wait_close();
        connection.session.set_timeout(0);
        match closed {
            Ok(()) => channel
                .exit_status()
                .map_err(|err| session_fault(&endpoint, err))?,
            Err(_) => -1,
        }
    };

    Ok(CommandResult {
        stdout: stdout.text(),
        stderr: stderr.text(),
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
    })
}

fn is_transport_loss(err: &ssh2::Error) -> bool {
    match err.code() {
        ssh2::ErrorCode::Session(code) => LIBSSH2_TRANSPORT_LOSS.contains(&code),
        ssh2::ErrorCode::SFTP(code) => code == SFTP_NO_CONNECTION || code == SFTP_CONNECTION_LOST,
    }
}

fn is_io_transport_loss(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

fn session_fault(endpoint: &str, err: ssh2::Error) -> CoreError {
    if is_transport_loss(&err) {
        CoreError::Connection {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    } else {
        CoreError::Internal(format!("SSH error: {}", err))
    }
}

fn stream_fault(endpoint: &str, stream: &str, err: std::io::Error) -> CoreError {
    CoreError::Connection {
        endpoint: endpoint.to_string(),
        reason: format!("{} read failed: {}", stream, err),
    }
}

fn sftp_fault(endpoint: &str, remote_path: &str, err: ssh2::Error) -> CoreError {
    match err.code() {
        ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => CoreError::SourceNotFound {
            path: remote_path.to_string(),
        },
        _ if is_transport_loss(&err) => CoreError::Connection {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        },
        _ => CoreError::transfer_io(remote_path, err),
    }
}

fn copy_fault(remote_path: &str, err: std::io::Error) -> CoreError {
    if is_io_transport_loss(&err) {
        CoreError::transfer_io(remote_path, format!("{}: {}", CONNECTION_LOST_PREFIX, err))
    } else {
        CoreError::transfer_io(remote_path, err)
    }
}
