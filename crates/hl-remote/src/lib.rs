//! hl-remote: remote sessions, tunnels and chained hops for hopline
//!
//! A [`RemoteSession`] drives a remote machine through a stack of
//! authenticated hops. Its [`TunnelManager`] opens forward and reverse
//! port tunnels through any hop, and can bootstrap a new session that
//! authenticates through one of those tunnels, one hop deeper.
//!
//! ```ignore
//! let bastion = hl_remote::ssh(SshConfig::default().with_target("ops@bastion")?);
//! bastion.connect().await?;
//!
//! let tunnel = bastion.tunnels().forward(0, "10.0.0.5", 22).await?;
//! let inner = bastion
//!     .tunnels()
//!     .connect_tunnel(&tunnel, Credentials::key("ops", key_path), StateMode::Forked)
//!     .await?;
//! let uptime = inner.execute("uptime").await?;
//! ```

pub mod scp;
pub mod session;
pub mod state;
pub mod tunnel;

use std::sync::Arc;

use hl_core::config::{SshConfig, TunnelConfig};
use hl_ssh::{SshConnector, SshTransport};

pub use scp::ScpProtocol;
pub use session::{ConnectionStack, Hop, RemoteSession, SessionBuilder};
pub use state::{ExecutionState, StateMode};
pub use tunnel::{
    CloseReason, ForwardRequest, Pipe, PipeOutcome, PipeStats, ReverseRequest, StopReason, Tunnel,
    TunnelEvent, TunnelId, TunnelManager, TunnelMode, TunnelRegistry,
};

/// Disconnected SSH session for `config`, with default tunnel settings
pub fn ssh(config: SshConfig) -> RemoteSession {
    ssh_with(config, TunnelConfig::default())
}

/// Disconnected SSH session for `config`
pub fn ssh_with(config: SshConfig, tunnel_config: TunnelConfig) -> RemoteSession {
    let mut connector = SshConnector::new();
    if let Some(interval) = config.keepalive_interval {
        connector = connector.keepalive_interval(interval);
    }

    SessionBuilder::new(Arc::new(SshTransport::new(config)), Arc::new(connector))
        .tunnel_config(tunnel_config)
        .build()
}
