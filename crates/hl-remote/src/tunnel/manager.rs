//! Tunnel creation, tracking and chained-session bootstrap

use std::sync::{Arc, Weak};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use hl_core::config::TunnelConfig;
use hl_core::{Credentials, HopTarget, Transport, TransportError};

use super::accept::{self, LoopContext};
use super::events::TunnelEvent;
use super::registry::TunnelRegistry;
use super::types::{Tunnel, TunnelId, TunnelMode};
use crate::session::{RemoteSession, SessionInner};
use crate::state::StateMode;

/// Address reverse forwards listen on when none is given
pub const DEFAULT_REVERSE_BIND: &str = "0.0.0.0";

/// Parameters of a forward tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub local_host: String,
    /// 0 picks a free port, see [`Tunnel::local_port`]
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// Stack index of the hop to route through, default hop when `None`
    pub hop: Option<isize>,
}

impl ForwardRequest {
    /// Listen on loopback, route through the default hop
    pub fn new(local_port: u16, remote_host: impl Into<String>, remote_port: u16) -> Self {
        Self {
            local_host: "127.0.0.1".to_string(),
            local_port,
            remote_host: remote_host.into(),
            remote_port,
            hop: None,
        }
    }

    /// Listen on `host` instead of loopback
    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Route through the hop at `index` instead of the default one
    pub fn via(mut self, index: isize) -> Self {
        self.hop = Some(index);
        self
    }
}

/// Parameters of a reverse tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRequest {
    /// Remote listen address
    pub bind_addr: String,
    /// 0 lets the server pick, see [`Tunnel::remote_port`]
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub hop: Option<isize>,
}

impl ReverseRequest {
    /// Listen on [`DEFAULT_REVERSE_BIND`] through the default hop
    pub fn new(remote_port: u16, local_host: impl Into<String>, local_port: u16) -> Self {
        Self {
            bind_addr: DEFAULT_REVERSE_BIND.to_string(),
            remote_port,
            local_host: local_host.into(),
            local_port,
            hop: None,
        }
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn via(mut self, index: isize) -> Self {
        self.hop = Some(index);
        self
    }
}

/// Creates and tracks the tunnels of one session
///
/// Every tunnel is listed both here and in the session's execution state,
/// and leaves both when its accept loop ends.
pub struct TunnelManager {
    session: Weak<SessionInner>,
    tunnels: TunnelRegistry,
    events: broadcast::Sender<TunnelEvent>,
    config: TunnelConfig,
}

impl TunnelManager {
    pub(crate) fn new(session: Weak<SessionInner>, config: TunnelConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            session,
            tunnels: TunnelRegistry::new(),
            events,
            config,
        }
    }

    pub(crate) fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    fn session(&self) -> Result<RemoteSession, TransportError> {
        self.session
            .upgrade()
            .map(RemoteSession::from_inner)
            .ok_or_else(|| TransportError::ConnectionUnavailable("session was dropped".to_string()))
    }

    /// Resolve a hop and make sure it can carry traffic
    fn hop(
        &self,
        session: &RemoteSession,
        index: Option<isize>,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let layer = session.connection_layer(index.unwrap_or(-1))?;
        if !layer.is_connected() {
            return Err(TransportError::ConnectionUnavailable(format!(
                "{} is not connected",
                layer.info()
            )));
        }
        Ok(layer)
    }

    /// Forward `127.0.0.1:local_port` to `remote_host:remote_port`
    pub async fn forward(
        &self,
        local_port: u16,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Result<Arc<Tunnel>, TransportError> {
        self.forward_with(ForwardRequest::new(local_port, remote_host, remote_port))
            .await
    }

    /// Bind a local listener and relay each connection through the hop
    ///
    /// Returns once the listener is bound; the accept loop runs in the
    /// background.
    pub async fn forward_with(&self, request: ForwardRequest) -> Result<Arc<Tunnel>, TransportError> {
        let session = self.session()?;
        let transport = self.hop(&session, request.hop)?;

        let listener = TcpListener::bind((request.local_host.as_str(), request.local_port))
            .await
            .map_err(|e| {
                TransportError::address_in_use(
                    format!("{}:{}", request.local_host, request.local_port),
                    e,
                )
            })?;
        let local_port = listener.local_addr()?.port();

        let tunnel = Arc::new(Tunnel::new(
            TunnelMode::Forward,
            (request.local_host, local_port),
            (request.remote_host, request.remote_port),
            transport,
        ));

        let ctx = self.launch(&session, &tunnel);
        tokio::spawn(accept::run_forward(listener, ctx));
        Ok(tunnel)
    }

    /// Relay connections to remote `remote_port` to `local_host:local_port`
    pub async fn reverse(
        &self,
        remote_port: u16,
        local_host: impl Into<String>,
        local_port: u16,
    ) -> Result<Arc<Tunnel>, TransportError> {
        self.reverse_with(ReverseRequest::new(remote_port, local_host, local_port))
            .await
    }

    /// Register a remote forward and relay each forwarded channel locally
    pub async fn reverse_with(&self, request: ReverseRequest) -> Result<Arc<Tunnel>, TransportError> {
        let session = self.session()?;
        let transport = self.hop(&session, request.hop)?;

        let bound = transport
            .request_remote_forward(&request.bind_addr, request.remote_port)
            .await?;

        let tunnel = Arc::new(Tunnel::new(
            TunnelMode::Reverse,
            (request.local_host, request.local_port),
            (request.bind_addr.clone(), bound),
            transport,
        ));

        let ctx = self.launch(&session, &tunnel);
        tokio::spawn(accept::run_reverse(request.bind_addr, ctx));
        Ok(tunnel)
    }

    fn launch(&self, session: &RemoteSession, tunnel: &Arc<Tunnel>) -> LoopContext {
        let shared = session.state().tunnels().clone();
        self.tunnels.insert(Arc::clone(tunnel));
        shared.insert(Arc::clone(tunnel));

        tracing::info!(tunnel = %tunnel.id(), hop = %tunnel.hop_id(), "Started {} tunnel {}", tunnel.mode(), tunnel);
        let _ = self.events.send(TunnelEvent::Started {
            id: tunnel.id(),
            mode: tunnel.mode(),
            description: tunnel.to_string(),
        });

        LoopContext {
            tunnel: Arc::clone(tunnel),
            registries: vec![self.tunnels.clone(), shared],
            events: self.events.clone(),
            config: self.config.clone(),
        }
    }

    /// Authenticate a new hop through `tunnel` and return its session
    ///
    /// The new hop is named after the tunnel's destination.
    pub async fn connect_tunnel(
        &self,
        tunnel: &Tunnel,
        credentials: Credentials,
        mode: StateMode,
    ) -> Result<RemoteSession, TransportError> {
        let target = match tunnel.mode() {
            TunnelMode::Forward => HopTarget::new(tunnel.remote_host(), tunnel.remote_port()),
            TunnelMode::Reverse => HopTarget::new(tunnel.local_host(), tunnel.local_port()),
        };
        self.connect_tunnel_with(tunnel, target, credentials, mode)
            .await
    }

    /// Like [`connect_tunnel`](Self::connect_tunnel) with an explicit target
    ///
    /// Dials the tunnel's local endpoint, runs the connector's handshake
    /// over it, and builds a session whose stack is this session's stack
    /// plus the new hop. This session's stack is left untouched on failure.
    pub async fn connect_tunnel_with(
        &self,
        tunnel: &Tunnel,
        target: HopTarget,
        credentials: Credentials,
        mode: StateMode,
    ) -> Result<RemoteSession, TransportError> {
        let parent = self.session()?;

        if !tunnel.is_running() {
            return Err(TransportError::ConnectionUnavailable(format!(
                "tunnel {} is not running",
                tunnel.id()
            )));
        }
        if !tunnel.transport().is_connected() {
            return Err(TransportError::ConnectionUnavailable(format!(
                "{} is not connected",
                tunnel.transport().info()
            )));
        }

        let (host, port) = tunnel.local_addr();
        let stream = match tokio::time::timeout(
            self.config.dial_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::ConnectionUnavailable(format!(
                    "dial {}:{}: {}",
                    host, port, e
                )))
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "dial",
                    duration: self.config.dial_timeout,
                })
            }
        };

        tracing::debug!(tunnel = %tunnel.id(), "Authenticating {}@{} through tunnel", credentials.user, target.host);
        let layer = tokio::time::timeout(
            self.config.handshake_timeout,
            parent.connector().handshake(stream, &target, &credentials),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: "handshake",
            duration: self.config.handshake_timeout,
        })??;

        let child = parent.chain(layer, mode);
        tracing::info!(tunnel = %tunnel.id(), "Chained session to {} (depth {})", target.host, child.depth());
        Ok(child)
    }

    /// Stop `tunnel` and drop it from the registries
    ///
    /// Returns `false` when it was already stopped.
    pub fn stop(&self, tunnel: &Tunnel) -> bool {
        let stopped = tunnel.stop();
        self.tunnels.remove(&tunnel.id());
        if let Some(session) = self.session.upgrade() {
            session.state.tunnels().remove(&tunnel.id());
        }
        stopped
    }

    /// Stop every tunnel this manager created; returns how many were live
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for tunnel in self.tunnels.list() {
            if self.stop(&tunnel) {
                stopped += 1;
            }
        }
        stopped
    }

    /// Live tunnels created by this manager
    pub fn list(&self) -> Vec<Arc<Tunnel>> {
        self.tunnels.list()
    }

    /// Live tunnel `id`, if this manager created it
    pub fn get(&self, id: &TunnelId) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id)
    }

    /// Number of live tunnels created by this manager
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Receive tunnel lifecycle and relay events
    ///
    /// Events sent before subscribing are not replayed; a receiver that
    /// falls behind by more than the configured capacity sees `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }
}
