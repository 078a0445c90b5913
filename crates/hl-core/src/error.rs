//! Core error types for hopline

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::command::CommandResult;

/// Top-level error type for the hopline ecosystem
#[derive(Error, Debug)]
pub enum HlError {
    /// Transport or tunnel error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Remote command failed
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Requested protocol is not attached to the session
    #[error("Protocol not available: {0}")]
    ProtocolNotAvailable(String),

    /// Session lacks the privileges an operation requires
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Local file named by an operation is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a transport hop, a tunnel or a relay
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation attempted while the owning hop is disconnected
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Local listener could not be bound
    #[error("Address in use: {addr}: {source}")]
    AddressInUse {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Remote side refused a reverse-forward registration
    #[error("Remote forward of port {port} rejected: {reason}")]
    ForwardRejected { port: u16, reason: String },

    /// Credential rejected while bootstrapping a hop
    #[error("Authentication failed for {user}@{host}")]
    AuthenticationError { user: String, host: String },

    /// Handshake or dial exceeded its bound
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// One relay endpoint closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Stack index does not name a hop
    #[error("No hop at index {index} (stack depth {depth})")]
    InvalidHop { index: isize, depth: usize },

    /// Remote file does not exist
    #[error("Remote file not found: {0}")]
    FileNotFound(String),

    /// Remote file exists but may not be opened that way
    #[error("Permission denied for remote file: {0}")]
    FileAccessDenied(String),

    /// Opaque failure inside the SSH layer
    #[error("SSH error: {0}")]
    Ssh(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Build an `AddressInUse` error for a failed bind
    pub fn address_in_use(addr: impl ToString, source: std::io::Error) -> Self {
        Self::AddressInUse {
            addr: addr.to_string(),
            source,
        }
    }

    /// Build a `ConnectionUnavailable` error naming the peer
    pub fn unavailable(peer: SocketAddr, source: std::io::Error) -> Self {
        Self::ConnectionUnavailable(format!("{}: {}", peer, source))
    }

    /// Whether this error is a setup-time timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Typed failure of a remote command, classified from its result
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// Exit 13 or a permission-denied message
    #[error("Permission denied executing '{}'", .0.command)]
    PermissionDenied(CommandResult),

    /// Exit 127 or a missing file/command
    #[error("Resource not found in '{}'", .0.command)]
    NotFound(CommandResult),

    /// Target already exists
    #[error("Resource already exists in '{}'", .0.command)]
    AlreadyExists(CommandResult),

    /// Exit 2 or an invalid-argument message
    #[error("Invalid argument in '{}'", .0.command)]
    InvalidArgument(CommandResult),

    /// Exit 124 or a timed-out message
    #[error("Command timed out: '{}'", .0.command)]
    Timeout(CommandResult),

    /// Any other non-zero exit
    #[error("Command failed with exit code {}: '{}'", .0.exit_code, .0.command)]
    Failed(CommandResult),
}

impl CommandError {
    /// The result that produced this error
    pub fn result(&self) -> &CommandResult {
        match self {
            Self::PermissionDenied(r)
            | Self::NotFound(r)
            | Self::AlreadyExists(r)
            | Self::InvalidArgument(r)
            | Self::Timeout(r)
            | Self::Failed(r) => r,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
