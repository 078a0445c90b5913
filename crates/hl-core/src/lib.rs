//! hl-core: Core abstractions and configuration for hopline
//!
//! This crate provides the shared types, the error taxonomy, configuration
//! structures and the `Transport`/`Connector` traits used by the SSH
//! transport, the tunnel subsystem and the CLI.

pub mod command;
pub mod config;
pub mod error;
pub mod path;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{CommandContext, CommandResult};
pub use error::{CommandError, ConfigError, HlError, TransportError};
pub use traits::{Connector, DuplexChannel, DuplexIo, FileMode, ForwardedChannel, Transport};
pub use types::{
    AuthMethod, Capabilities, Credentials, HopId, HopInfo, HopTarget, TransferResult,
};
