//! SSH transport hop

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use hl_core::command::build_command;
use hl_core::config::SshConfig;
use hl_core::{
    CommandContext, CommandResult, DuplexChannel, FileMode, ForwardedChannel, HopId, HopInfo,
    Transport, TransportError,
};

use crate::connector::{authenticate, client_config};
use crate::handler::{ClientHandler, ForwardTable};

/// One SSH hop backed by a russh client session
///
/// A transport built from an [`SshConfig`] dials its host on `connect()`.
/// One produced by [`crate::SshConnector`] arrives connected over a
/// tunnel and cannot be re-dialed once it drops.
pub struct SshTransport {
    id: HopId,
    info: HopInfo,
    /// Dial settings, `None` for hops bootstrapped over a tunnel
    config: Option<SshConfig>,
    handle: Mutex<Option<Handle<ClientHandler>>>,
    connected: AtomicBool,
    forwards: ForwardTable,
}

impl SshTransport {
    /// A disconnected hop that dials `config.host` on `connect()`
    pub fn new(config: SshConfig) -> Self {
        Self {
            id: HopId::new(),
            info: config.hop_info(),
            config: Some(config),
            handle: Mutex::new(None),
            connected: AtomicBool::new(false),
            forwards: ForwardTable::new(),
        }
    }

    /// Wrap an authenticated session
    pub(crate) fn from_handle(
        info: HopInfo,
        handle: Handle<ClientHandler>,
        forwards: ForwardTable,
    ) -> Self {
        Self {
            id: HopId::new(),
            info,
            config: None,
            handle: Mutex::new(Some(handle)),
            connected: AtomicBool::new(true),
            forwards,
        }
    }

    fn unavailable(&self) -> TransportError {
        TransportError::ConnectionUnavailable(format!("{} is not connected", self.info))
    }

    async fn dial(&self, config: &SshConfig) -> Result<Handle<ClientHandler>, TransportError> {
        let handler = ClientHandler::new(
            config.host.clone(),
            config.expected_host_key.clone(),
            self.forwards.clone(),
        );

        tracing::debug!("Connecting to {}", self.info);
        let mut handle = tokio::time::timeout(
            config.connect_timeout,
            client::connect(
                client_config(config.keepalive_interval),
                (config.host.as_str(), config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "SSH connect",
            duration: config.connect_timeout,
        })?
        .map_err(|e| {
            TransportError::ConnectionUnavailable(format!(
                "Failed to connect to {}: {}",
                self.info, e
            ))
        })?;

        authenticate(&mut handle, &config.credentials(), &config.host).await?;
        Ok(handle)
    }

    async fn read_output(
        command: &str,
        channel: &mut russh::Channel<client::Msg>,
    ) -> CommandResult {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                    stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                // Exit status may follow EOF, keep reading until close
                _ => {}
            }
        }

        CommandResult::new(
            command,
            String::from_utf8_lossy(&stdout),
            String::from_utf8_lossy(&stderr),
            // No exit status means the remote side was killed by a signal
            exit_code.unwrap_or(-1),
        )
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn id(&self) -> HopId {
        self.id
    }

    fn info(&self) -> &HopInfo {
        &self.info
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.handle.lock().await;
        if guard.as_ref().is_some_and(|h| !h.is_closed()) {
            return Ok(());
        }

        let Some(config) = &self.config else {
            return Err(TransportError::ConnectionUnavailable(format!(
                "{} was bootstrapped through a tunnel and cannot be re-dialed",
                self.info
            )));
        };

        let handle = self.dial(config).await?;
        *guard = Some(handle);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to {}", self.info);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.forwards.clear();

        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} was not clean: {}", self.info, e);
        }
        tracing::info!("Disconnected from {}", self.info);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        // Busy handle means someone is using it right now
        match self.handle.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_closed()),
            Err(_) => true,
        }
    }

    async fn execute(
        &self,
        command: &str,
        ctx: &CommandContext,
    ) -> Result<CommandResult, TransportError> {
        let mut channel = {
            let guard = self.handle.lock().await;
            let handle = guard.as_ref().ok_or_else(|| self.unavailable())?;
            handle
                .channel_open_session()
                .await
                .map_err(|e| TransportError::Ssh(format!("Failed to open session: {}", e)))?
        };

        let full = build_command(command, ctx);
        tracing::trace!(hop = %self.id, "exec: {}", full);
        channel
            .exec(true, full)
            .await
            .map_err(|e| TransportError::Ssh(format!("Failed to execute command: {}", e)))?;

        Ok(Self::read_output(command, &mut channel).await)
    }

    async fn open_direct_channel(
        &self,
        destination: (&str, u16),
        origin: SocketAddr,
    ) -> Result<DuplexChannel, TransportError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or_else(|| self.unavailable())?;

        let channel = handle
            .channel_open_direct_tcpip(
                destination.0,
                u32::from(destination.1),
                origin.ip().to_string(),
                u32::from(origin.port()),
            )
            .await
            .map_err(|e| {
                TransportError::Ssh(format!(
                    "Failed to open channel to {}:{}: {}",
                    destination.0, destination.1, e
                ))
            })?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn request_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<u16, TransportError> {
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| self.unavailable())?;

        let pending = self.forwards.begin(bind_port);
        let bound = handle
            .tcpip_forward(bind_addr, u32::from(bind_port))
            .await
            .map_err(|e| TransportError::ForwardRejected {
                port: bind_port,
                reason: e.to_string(),
            })?;

        // Servers only echo the port back when 0 was requested
        let bound = if bound == 0 { bind_port } else { bound as u16 };
        pending.complete(bound);
        tracing::debug!("Remote forward registered on {}:{}", bind_addr, bound);
        Ok(bound)
    }

    async fn cancel_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<(), TransportError> {
        self.forwards.remove(bind_port);

        let guard = self.handle.lock().await;
        let Some(handle) = guard.as_ref() else {
            return Ok(());
        };
        handle
            .cancel_tcpip_forward(bind_addr, u32::from(bind_port))
            .await
            .map_err(|e| TransportError::Ssh(format!("Failed to cancel forward: {}", e)))?;
        Ok(())
    }

    async fn open_file(&self, path: &str, mode: FileMode) -> Result<DuplexChannel, TransportError> {
        let channel = {
            let guard = self.handle.lock().await;
            let handle = guard.as_ref().ok_or_else(|| self.unavailable())?;
            handle
                .channel_open_session()
                .await
                .map_err(|e| TransportError::Ssh(format!("Failed to open session: {}", e)))?
        };
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransportError::Ssh(format!("Failed to request SFTP subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::Ssh(format!("Failed to start SFTP session: {}", e)))?;

        tracing::trace!(hop = %self.id, "sftp open {:?}: {}", mode, path);
        let file = match mode {
            FileMode::Read => sftp.open(path).await,
            FileMode::Write => sftp.create(path).await,
        }
        .map_err(|e| sftp_error(path, e))?;

        Ok(Box::new(file))
    }

    async fn accept_forwarded_channel(
        &self,
        bind_port: u16,
        timeout: Duration,
    ) -> Result<Option<ForwardedChannel>, TransportError> {
        if !self.is_connected() {
            return Err(self.unavailable());
        }

        let queue = self
            .forwards
            .receiver(bind_port)
            .ok_or(TransportError::ChannelClosed)?;

        let mut rx = queue.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(channel)) => Ok(Some(channel)),
            Ok(None) => Err(TransportError::ChannelClosed),
            Err(_) => Ok(None),
        }
    }
}

fn sftp_error(path: &str, error: SftpError) -> TransportError {
    match error {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => TransportError::FileNotFound(path.to_string()),
            StatusCode::PermissionDenied => TransportError::FileAccessDenied(path.to_string()),
            _ => TransportError::Ssh(format!("{}: {}", path, status.error_message)),
        },
        other => TransportError::Ssh(format!("{}: {}", path, other)),
    }
}
