//! Tunnel handle and identifiers

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hl_core::{HopId, Transport};

use super::pipe::PipeStats;

/// Unique identifier for a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(Uuid);

impl TunnelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Direction of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// Local listener relayed to a remote destination
    Forward,
    /// Remote listener relayed to a local destination
    Reverse,
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelMode::Forward => f.write_str("forward"),
            TunnelMode::Reverse => f.write_str("reverse"),
        }
    }
}

/// A running (or stopped) port forward
///
/// Owned by `Arc` between the registry, the manager and its accept loop.
/// Pipes are tracked weakly, for observability only.
pub struct Tunnel {
    id: TunnelId,
    mode: TunnelMode,
    local_host: String,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    transport: Arc<dyn Transport>,
    running: AtomicBool,
    cancel: CancellationToken,
    pipes: Mutex<Vec<Weak<PipeStats>>>,
}

impl Tunnel {
    pub(crate) fn new(
        mode: TunnelMode,
        local: (String, u16),
        remote: (String, u16),
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id: TunnelId::new(),
            mode,
            local_host: local.0,
            local_port: local.1,
            remote_host: remote.0,
            remote_port: remote.1,
            transport,
            running: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            pipes: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TunnelId {
        self.id
    }

    /// Forward or reverse
    pub fn mode(&self) -> TunnelMode {
        self.mode
    }

    /// Listen address for forward tunnels, destination host for reverse ones
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Local port; the bound port for forward tunnels requested with 0
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Destination host for forward tunnels, remote bind address for reverse ones
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Remote port; the server-assigned port for reverse tunnels requested with 0
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// The local endpoint a chained session dials
    pub fn local_addr(&self) -> (&str, u16) {
        (&self.local_host, self.local_port)
    }

    /// Hop servicing this tunnel
    pub fn hop_id(&self) -> HopId {
        self.transport.id()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// `false` once stopped, or once the accept loop gave up
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the accept loop and every pipe it spawned
    ///
    /// Idempotent; returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        self.cancel.cancel();
        if was_running {
            tracing::info!(tunnel = %self.id, "Stopping {} tunnel {}", self.mode, self);
        }
        was_running
    }

    /// Token cancelled when the tunnel stops
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Track a pipe spawned by the accept loop
    pub(crate) fn track_pipe(&self, stats: &Arc<PipeStats>) {
        let mut pipes = self.pipes.lock();
        pipes.retain(|p| p.strong_count() > 0);
        pipes.push(Arc::downgrade(stats));
    }

    /// Pipes still relaying
    pub fn active_pipes(&self) -> Vec<Arc<PipeStats>> {
        self.pipes
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|p| !p.is_closed())
            .collect()
    }
}

impl fmt::Display for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            TunnelMode::Forward => write!(
                f,
                "{}:{} -> {}:{}",
                self.local_host, self.local_port, self.remote_host, self.remote_port
            ),
            TunnelMode::Reverse => write!(
                f,
                "remote :{} -> {}:{}",
                self.remote_port, self.local_host, self.local_port
            ),
        }
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("local", &format_args!("{}:{}", self.local_host, self.local_port))
            .field("remote", &format_args!("{}:{}", self.remote_host, self.remote_port))
            .field("running", &self.is_running())
            .finish()
    }
}
