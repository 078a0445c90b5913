//! Transport hop traits

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::{CommandContext, CommandResult};
use crate::error::TransportError;
use crate::types::{HopId, HopInfo};

/// A bidirectional byte stream that can be relayed
pub trait DuplexIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed duplex stream handed out by a transport
pub type DuplexChannel = Box<dyn DuplexIo>;

/// How [`Transport::open_file`] opens a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Read from the start
    Read,
    /// Create or truncate, then write
    Write,
}

/// A connection the remote side accepted on a registered forward
pub struct ForwardedChannel {
    /// The channel carrying the connection's bytes
    pub stream: DuplexChannel,
    /// Port the remote listener accepted on
    pub connected_port: u16,
    /// Address of the remote client
    pub originator: String,
    pub originator_port: u16,
}

impl fmt::Debug for ForwardedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardedChannel")
            .field("connected_port", &self.connected_port)
            .field("originator", &self.originator)
            .field("originator_port", &self.originator_port)
            .finish_non_exhaustive()
    }
}

/// One authenticated connection hop
///
/// Implementations must be usable through `Arc<dyn Transport>` from many
/// tasks at once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique identifier of this hop
    fn id(&self) -> HopId;

    /// Host, user and port of this hop
    fn info(&self) -> &HopInfo;

    /// Establish the connection; a no-op when already connected
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the connection; safe to call more than once
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the hop is currently usable
    fn is_connected(&self) -> bool;

    /// Run `command` with the session context applied
    async fn execute(
        &self,
        command: &str,
        ctx: &CommandContext,
    ) -> Result<CommandResult, TransportError>;

    /// Open a channel to `destination` as seen from the remote host
    async fn open_direct_channel(
        &self,
        destination: (&str, u16),
        origin: SocketAddr,
    ) -> Result<DuplexChannel, TransportError>;

    /// Ask the remote side to listen on `bind_addr:bind_port`
    ///
    /// Returns the port actually bound, which differs from `bind_port`
    /// when 0 was requested.
    async fn request_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<u16, TransportError>;

    /// Drop a registration made by `request_remote_forward`
    async fn cancel_remote_forward(
        &self,
        bind_addr: &str,
        bind_port: u16,
    ) -> Result<(), TransportError>;

    /// Open `path` on the remote host as a byte stream
    ///
    /// A writer must be shut down before the remote file is complete.
    async fn open_file(&self, path: &str, mode: FileMode) -> Result<DuplexChannel, TransportError>;

    /// Wait up to `timeout` for a connection on a registered port
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn accept_forwarded_channel(
        &self,
        bind_port: u16,
        timeout: Duration,
    ) -> Result<Option<ForwardedChannel>, TransportError>;
}
