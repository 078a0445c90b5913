//! Tunnel lifecycle notifications

use super::pipe::CloseReason;
use super::types::{TunnelId, TunnelMode};

/// Why an accept loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called
    Requested,
    /// The servicing hop disconnected
    TransportLost,
    /// The listener or forward registration failed
    ListenerFailed(String),
}

/// Events broadcast by a `TunnelManager`
///
/// Relay failures never reach the caller of `forward`/`reverse`; this
/// channel is the only place they surface.
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    Started {
        id: TunnelId,
        mode: TunnelMode,
        description: String,
    },
    ConnectionOpened {
        id: TunnelId,
        peer: String,
    },
    ConnectionClosed {
        id: TunnelId,
        a_to_b: u64,
        b_to_a: u64,
        reason: CloseReason,
    },
    /// A single connection could not be set up
    RelayFailed {
        id: TunnelId,
        error: String,
    },
    Stopped {
        id: TunnelId,
        reason: StopReason,
    },
}

impl TunnelEvent {
    pub fn tunnel_id(&self) -> TunnelId {
        match self {
            TunnelEvent::Started { id, .. }
            | TunnelEvent::ConnectionOpened { id, .. }
            | TunnelEvent::ConnectionClosed { id, .. }
            | TunnelEvent::RelayFailed { id, .. }
            | TunnelEvent::Stopped { id, .. } => *id,
        }
    }
}
