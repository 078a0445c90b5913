//! In-memory transport and connector for tests
//!
//! `MockTransport` hands out `tokio::io::duplex` pairs instead of SSH
//! channels. The far end of every direct channel is delivered, with its
//! requested destination, to whoever holds the receiver from
//! [`MockTransport::take_direct_requests`], which plays the destination
//! host. Reverse forwards are fed by [`MockTransport::inject_forwarded`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
    ReadBuf,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::command::{CommandContext, CommandResult};
use crate::error::TransportError;
use crate::traits::{Connector, DuplexChannel, FileMode, ForwardedChannel, Transport};
use crate::types::{AuthMethod, Credentials, HopId, HopInfo, HopTarget};

const DUPLEX_CAPACITY: usize = 64 * 1024;

/// A direct channel opened through a [`MockTransport`]
pub struct DirectRequest {
    pub host: String,
    pub port: u16,
    pub origin: SocketAddr,
    /// The destination's end of the channel
    pub stream: DuplexStream,
}

type ForwardQueue = (
    mpsc::UnboundedSender<ForwardedChannel>,
    Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ForwardedChannel>>>,
);

/// Scriptable in-memory [`Transport`]
pub struct MockTransport {
    id: HopId,
    info: HopInfo,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    responses: Mutex<HashMap<String, CommandResult>>,
    executed: Mutex<Vec<(String, CommandContext)>>,
    direct_tx: mpsc::UnboundedSender<DirectRequest>,
    direct_rx: Mutex<Option<mpsc::UnboundedReceiver<DirectRequest>>>,
    reject_forwards: AtomicBool,
    next_port: AtomicU16,
    forwards: DashMap<u16, ForwardQueue>,
    cancelled: Mutex<Vec<u16>>,
    teardown_log: Mutex<Option<Arc<Mutex<Vec<String>>>>>,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    denied_files: Mutex<Vec<String>>,
}

impl MockTransport {
    /// A disconnected mock for `test@host:22`
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_info(HopInfo::new(host, 22, "test"))
    }

    pub fn with_info(info: HopInfo) -> Self {
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();

        let mut responses = HashMap::new();
        responses.insert("id -u".to_string(), CommandResult::new("id -u", "1000\n", "", 0));
        responses.insert(
            "pwd".to_string(),
            CommandResult::new("pwd", format!("/home/{}\n", info.user), "", 0),
        );
        responses.insert(
            "sudo -n true".to_string(),
            CommandResult::new("sudo -n true", "", "", 0),
        );

        Self {
            id: HopId::new(),
            info,
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            responses: Mutex::new(responses),
            executed: Mutex::new(Vec::new()),
            direct_tx,
            direct_rx: Mutex::new(Some(direct_rx)),
            reject_forwards: AtomicBool::new(false),
            next_port: AtomicU16::new(40000),
            forwards: DashMap::new(),
            cancelled: Mutex::new(Vec::new()),
            teardown_log: Mutex::new(None),
            files: Arc::new(Mutex::new(HashMap::new())),
            denied_files: Mutex::new(Vec::new()),
        }
    }

    /// A mock that is already connected
    pub fn connected(host: impl Into<String>) -> Arc<Self> {
        let mock = Self::new(host);
        mock.connected.store(true, Ordering::SeqCst);
        Arc::new(mock)
    }

    /// Script the result of `command`
    pub fn respond(&self, command: &str, stdout: &str, stderr: &str, exit_code: i32) {
        self.responses.lock().insert(
            command.to_string(),
            CommandResult::new(command, stdout, stderr, exit_code),
        );
    }

    /// Commands executed so far, with the context each one saw
    pub fn executed(&self) -> Vec<(String, CommandContext)> {
        self.executed.lock().clone()
    }

    /// Take the destination side of every direct channel
    ///
    /// Only the first caller gets the receiver.
    pub fn take_direct_requests(&self) -> Option<mpsc::UnboundedReceiver<DirectRequest>> {
        self.direct_rx.lock().take()
    }

    /// Make every later `request_remote_forward` fail
    pub fn reject_forwards(&self, reject: bool) {
        self.reject_forwards.store(reject, Ordering::SeqCst);
    }

    /// Simulate a remote client connecting to a registered port
    ///
    /// Returns the client's end, or `None` when nothing is registered.
    pub fn inject_forwarded(&self, port: u16) -> Option<DuplexStream> {
        let entry = self.forwards.get(&port)?;
        let (near, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        let channel = ForwardedChannel {
            stream: Box::new(far),
            connected_port: port,
            originator: "203.0.113.9".to_string(),
            originator_port: 50000,
        };
        entry.0.send(channel).ok()?;
        Some(near)
    }

    /// Ports with a live remote forward
    pub fn registered_forwards(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.forwards.iter().map(|e| *e.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Ports passed to `cancel_remote_forward`
    pub fn cancelled_forwards(&self) -> Vec<u16> {
        self.cancelled.lock().clone()
    }

    /// Append this hop's host to `log` whenever it disconnects
    /// Place a file on the mock remote host
    pub fn put_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.to_string(), contents.into());
    }

    /// Contents of a remote file, as written so far
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    /// Refuse every open of `path`
    pub fn deny_file(&self, path: &str) {
        self.denied_files.lock().push(path.to_string());
    }

    pub fn log_teardown_into(&self, log: Arc<Mutex<Vec<String>>>) {
        *self.teardown_log.lock() = Some(log);
    }

    /// Drop the connection without going through `disconnect`
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.forwards.clear();
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::ConnectionUnavailable(format!(
                "{} is not connected",
                self.info
            )))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> HopId {
        self.id
    }

    fn info(&self) -> &HopInfo {
        &self.info
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.forwards.clear();
            if let Some(log) = self.teardown_log.lock().as_ref() {
                log.lock().push(self.info.host.clone());
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        command: &str,
        ctx: &CommandContext,
    ) -> Result<CommandResult, TransportError> {
        self.ensure_connected()?;
        self.executed.lock().push((command.to_string(), ctx.clone()));

        let result = self
            .responses
            .lock()
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandResult::new(command, "", "", 0));
        Ok(result)
    }

    async fn open_direct_channel(
        &self,
        destination: (&str, u16),
        origin: SocketAddr,
    ) -> Result<DuplexChannel, TransportError> {
        self.ensure_connected()?;

        let (near, far) = tokio::io::duplex(DUPLEX_CAPACITY);
        let request = DirectRequest {
            host: destination.0.to_string(),
            port: destination.1,
            origin,
            stream: far,
        };
        self.direct_tx.send(request).map_err(|_| {
            TransportError::ConnectionUnavailable(format!(
                "no destination behind {}:{}",
                destination.0, destination.1
            ))
        })?;

        Ok(Box::new(near))
    }

    async fn request_remote_forward(
        &self,
        _bind_addr: &str,
        bind_port: u16,
    ) -> Result<u16, TransportError> {
        self.ensure_connected()?;

        if self.reject_forwards.load(Ordering::SeqCst) {
            return Err(TransportError::ForwardRejected {
                port: bind_port,
                reason: "administratively prohibited".to_string(),
            });
        }

        let port = if bind_port == 0 {
            self.next_port.fetch_add(1, Ordering::SeqCst)
        } else {
            bind_port
        };

        if self.forwards.contains_key(&port) {
            return Err(TransportError::ForwardRejected {
                port,
                reason: "port already forwarded".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.forwards
            .insert(port, (tx, Arc::new(tokio::sync::Mutex::new(rx))));
        Ok(port)
    }

    async fn cancel_remote_forward(
        &self,
        _bind_addr: &str,
        bind_port: u16,
    ) -> Result<(), TransportError> {
        self.forwards.remove(&bind_port);
        self.cancelled.lock().push(bind_port);
        Ok(())
    }

    async fn open_file(&self, path: &str, mode: FileMode) -> Result<DuplexChannel, TransportError> {
        self.ensure_connected()?;
        if self.denied_files.lock().iter().any(|denied| denied == path) {
            return Err(TransportError::FileAccessDenied(path.to_string()));
        }

        let contents = match mode {
            FileMode::Read => self
                .file(path)
                .ok_or_else(|| TransportError::FileNotFound(path.to_string()))?,
            FileMode::Write => {
                self.put_file(path, Vec::new());
                Vec::new()
            }
        };

        Ok(Box::new(MockFile {
            path: path.to_string(),
            files: Arc::clone(&self.files),
            contents: Cursor::new(contents),
        }))
    }

    async fn accept_forwarded_channel(
        &self,
        bind_port: u16,
        timeout: Duration,
    ) -> Result<Option<ForwardedChannel>, TransportError> {
        self.ensure_connected()?;

        let queue = self
            .forwards
            .get(&bind_port)
            .map(|entry| entry.1.clone())
            .ok_or(TransportError::ChannelClosed)?;

        let mut rx = queue.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(channel)) => Ok(Some(channel)),
            Ok(None) => Err(TransportError::ChannelClosed),
            Err(_) => Ok(None),
        }
    }
}

/// Open remote file; writes land in the owning mock immediately
struct MockFile {
    path: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    contents: Cursor<Vec<u8>>,
}

impl AsyncRead for MockFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.contents).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.files
            .lock()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Serve every direct request with `handler` on its own task
pub fn serve_destinations<F, Fut>(mut requests: mpsc::UnboundedReceiver<DirectRequest>, handler: F)
where
    F: Fn(DirectRequest) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            tokio::spawn(handler(request));
        }
    });
}

/// Destination that echoes everything it reads
pub async fn echo(mut stream: DuplexStream) {
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Destination speaking the [`MockConnector`] handshake
///
/// Answers `OK` when the offered secret equals `password`, `DENY`
/// otherwise, then keeps the stream open until the client leaves.
pub async fn auth_gate(stream: DuplexStream, password: String) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }

    let offered = line.trim_end().rsplit(' ').next().unwrap_or_default();
    let reply: &[u8] = if offered == password { b"OK\n" } else { b"DENY\n" };

    let mut stream = reader.into_inner();
    if stream.write_all(reply).await.is_err() {
        return;
    }

    let mut sink = [0u8; 256];
    while let Ok(n) = stream.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

/// [`Connector`] speaking a one-line handshake
///
/// Sends `HELLO <user> <secret>` and expects `OK` or `DENY` back. Each
/// accepted handshake yields a connected [`MockTransport`].
#[derive(Default)]
pub struct MockConnector {
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transports produced by successful handshakes
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn handshake(
        &self,
        stream: TcpStream,
        target: &HopTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let secret = match &credentials.auth {
            AuthMethod::Password { password } => password.clone(),
            AuthMethod::Key { path, .. } => path.display().to_string(),
        };

        let mut reader = BufReader::new(stream);
        reader
            .get_mut()
            .write_all(format!("HELLO {} {}\n", credentials.user, secret).as_bytes())
            .await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(TransportError::ChannelClosed);
        }

        match line.trim_end() {
            "OK" => {
                let transport = Arc::new(Self::hop(target, credentials));
                self.created.lock().push(transport.clone());
                Ok(transport)
            }
            _ => Err(TransportError::AuthenticationError {
                user: credentials.user.clone(),
                host: target.host.clone(),
            }),
        }
    }
}

impl MockConnector {
    fn hop(target: &HopTarget, credentials: &Credentials) -> MockTransport {
        let mock = MockTransport::with_info(HopInfo::new(
            &target.host,
            target.port,
            &credentials.user,
        ));
        mock.connected.store(true, Ordering::SeqCst);
        mock
    }
}
