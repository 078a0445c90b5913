//! hl-ssh: SSH transport hop for hopline
//!
//! [`SshTransport`] implements `hl_core::Transport` on top of a russh
//! client session: commands run on session channels, forward tunnels use
//! `direct-tcpip` channels and reverse tunnels use `tcpip-forward`
//! registrations. [`SshConnector`] authenticates a new hop over a stream
//! that was already dialed, which is how chained sessions are built.

mod connector;
mod handler;
mod transport;

pub use connector::SshConnector;
pub use transport::SshTransport;
