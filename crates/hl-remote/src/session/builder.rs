//! Session construction

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hl_core::config::TunnelConfig;
use hl_core::{Connector, Transport};

use super::remote::{RemoteSession, SessionInner};
use super::stack::ConnectionStack;
use crate::state::ExecutionState;
use crate::tunnel::TunnelManager;

/// Builds a fully initialized [`RemoteSession`]
///
/// ```ignore
/// let session = SessionBuilder::new(transport, connector)
///     .tunnel_config(TunnelConfig::default())
///     .build();
/// session.connect().await?;
/// ```
pub struct SessionBuilder {
    stack: ConnectionStack,
    connector: Arc<dyn Connector>,
    state: Option<ExecutionState>,
    tunnel_config: TunnelConfig,
    parent: Option<RemoteSession>,
}

impl SessionBuilder {
    /// Session with `transport` as its only, owned, hop
    ///
    /// `connector` bootstraps the hops of sessions chained from this one.
    pub fn new(transport: Arc<dyn Transport>, connector: Arc<dyn Connector>) -> Self {
        Self::from_stack(ConnectionStack::new(transport), connector)
    }

    pub(crate) fn from_stack(stack: ConnectionStack, connector: Arc<dyn Connector>) -> Self {
        Self {
            stack,
            connector,
            state: None,
            tunnel_config: TunnelConfig::default(),
            parent: None,
        }
    }

    /// Use an existing state instead of a fresh one
    pub fn state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn tunnel_config(mut self, config: TunnelConfig) -> Self {
        self.tunnel_config = config;
        self
    }

    pub(crate) fn parent(mut self, parent: RemoteSession) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> RemoteSession {
        let SessionBuilder {
            stack,
            connector,
            state,
            tunnel_config,
            parent,
        } = self;

        let inner = Arc::new_cyclic(|weak| SessionInner {
            stack: RwLock::new(stack),
            state: state.unwrap_or_default(),
            tunnels: TunnelManager::new(weak.clone(), tunnel_config),
            connector,
            parent,
            children: Mutex::new(Vec::new()),
            scp: AtomicBool::new(false),
        });
        RemoteSession::from_inner(inner)
    }
}
