//! Remote session facade

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use hl_core::{
    Capabilities, CommandContext, CommandResult, Connector, HlError, HopInfo, Transport,
    TransportError,
};

use super::builder::SessionBuilder;
use super::stack::ConnectionStack;
use crate::scp::ScpProtocol;
use crate::state::{ExecutionState, StateMode};
use crate::tunnel::{TunnelManager, TunnelRegistry};

/// Protocols every session can hand out
const PROTOCOLS: &[&str] = &["ssh"];

/// Operations every session offers
const ACTIONS: &[&str] = &["exec", "env", "forward", "reverse", "connect_tunnel"];

/// Protocol attached by [`RemoteSession::expand_scp`]
const SCP: &str = "scp";

const SCP_ACTIONS: &[&str] = &["upload", "download"];

pub(crate) struct SessionInner {
    pub(crate) stack: RwLock<ConnectionStack>,
    pub(crate) state: ExecutionState,
    pub(crate) tunnels: TunnelManager,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) parent: Option<RemoteSession>,
    pub(crate) children: Mutex<Vec<ChildLink>>,
    pub(crate) scp: AtomicBool,
}

impl Drop for SessionInner {
    // Hand chained sessions over to the parent so its teardown still reaches them
    fn drop(&mut self) {
        let Some(parent) = &self.parent else {
            return;
        };
        let orphans = std::mem::take(self.children.get_mut());
        if !orphans.is_empty() {
            parent.inner.children.lock().extend(orphans);
        }
    }
}

/// A chained session as its parent sees it
///
/// The hop and tunnel registry outlive the child handle, so a parent can
/// still tear down what a dropped child left running.
#[derive(Clone)]
pub(crate) struct ChildLink {
    session: Weak<SessionInner>,
    hop: Arc<dyn Transport>,
    tunnels: TunnelRegistry,
}

impl ChildLink {
    /// Whether the link still refers to something to tear down
    fn is_pending(&self) -> bool {
        self.session.strong_count() > 0 || self.hop.is_connected()
    }

    /// Teardown for a child whose handles are all gone
    async fn release(&self) -> Result<(), TransportError> {
        for tunnel in self.tunnels.list() {
            tunnel.stop();
            self.tunnels.remove(&tunnel.id());
        }
        if self.hop.is_connected() {
            tracing::debug!("Disconnecting {} left by a dropped session", self.hop.info());
            self.hop.disconnect().await?;
        }
        Ok(())
    }
}

/// Handle to a remote session, cheap to clone
///
/// Owns a connection stack and a tunnel manager, and refers to an
/// execution state that may be shared with a parent or child session.
#[derive(Clone)]
pub struct RemoteSession {
    inner: Arc<SessionInner>,
}

impl RemoteSession {
    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Connect owned hops and seed the execution state
    ///
    /// Seeding runs `id -u`, `pwd` and `sudo -n true` on the default hop.
    pub async fn connect(&self) -> Result<(), HlError> {
        let stack = self.inner.stack.read().clone();
        stack.connect().await?;

        let layer = stack.connection_layer(-1)?;
        let raw = CommandContext::default();
        let state = &self.inner.state;

        let uid = layer.execute("id -u", &raw).await?;
        state.set_uid(uid.stdout.trim().parse().ok());

        let pwd = layer.execute("pwd", &raw).await?;
        let cwd = pwd.stdout.trim();
        if pwd.success() && !cwd.is_empty() {
            state.set_cwd(cwd);
        }

        let sudo = layer.execute("sudo -n true", &raw).await?;
        state.set_has_sudo(sudo.success());

        tracing::info!(
            "Session connected to {} (uid {:?}, sudo {})",
            layer.info(),
            state.uid(),
            state.has_sudo()
        );
        Ok(())
    }

    /// Tear the session down
    ///
    /// Chained sessions go first, deepest first, including ones whose
    /// handles were dropped. Then every tunnel running through an owned
    /// hop is stopped, whichever session opened it, and finally owned hops
    /// are disconnected innermost first. Inherited hops are left alone.
    pub fn disconnect(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let links: Vec<ChildLink> = self.inner.children.lock().iter().rev().cloned().collect();
            for link in links {
                let result = match link.session.upgrade() {
                    Some(inner) => {
                        let child = RemoteSession::from_inner(inner);
                        child.disconnect().await
                    }
                    None => link.release().await,
                };
                if let Err(e) = result {
                    tracing::warn!("Failed to disconnect chained session: {}", e);
                }
            }
            self.inner.children.lock().retain(ChildLink::is_pending);

            let stack = self.inner.stack.read().clone();
            let stopped = self.inner.tunnels.stop_all() + self.stop_hop_tunnels(&stack);
            if stopped > 0 {
                tracing::debug!("Stopped {} tunnel(s)", stopped);
            }

            stack.disconnect().await
        })
    }

    /// Stop tunnels in the execution state that run through an owned hop
    fn stop_hop_tunnels(&self, stack: &ConnectionStack) -> usize {
        let registry = self.inner.state.tunnels();
        let mut stopped = 0;
        for hop in stack.hops().iter().filter(|hop| hop.owned) {
            for tunnel in registry.for_hop(hop.layer.id()) {
                if tunnel.stop() {
                    stopped += 1;
                }
                registry.remove(&tunnel.id());
            }
        }
        stopped
    }

    /// Whether the default hop is connected
    pub fn is_connected(&self) -> bool {
        self.default_layer().is_connected()
    }

    /// Run `command` on the default hop
    pub async fn execute(&self, command: &str) -> Result<CommandResult, TransportError> {
        self.execute_on(-1, command).await
    }

    /// Run `command` on the hop at `index`
    pub async fn execute_on(
        &self,
        index: isize,
        command: &str,
    ) -> Result<CommandResult, TransportError> {
        let layer = self.connection_layer(index)?;
        let ctx = self.inner.state.context();
        layer.execute(command, &ctx).await
    }

    /// Run `command` and map a non-zero exit to a typed error
    pub async fn run(&self, command: &str) -> Result<CommandResult, HlError> {
        let result = self.execute(command).await?;
        Ok(result.into_checked()?)
    }

    /// Hop at `index`; -1 is the default (innermost) hop
    pub fn connection_layer(&self, index: isize) -> Result<Arc<dyn Transport>, TransportError> {
        self.inner.stack.read().connection_layer(index)
    }

    fn default_layer(&self) -> Arc<dyn Transport> {
        let stack = self.inner.stack.read();
        // A stack is never empty
        Arc::clone(&stack.hops()[stack.len() - 1].layer)
    }

    /// Append an owned hop and make it the default
    pub fn add_ssh_layer(&self, layer: Arc<dyn Transport>) {
        tracing::info!("Added hop {}", layer.info());
        self.inner.stack.write().add_ssh_layer(layer);
    }

    /// Number of hops
    pub fn depth(&self) -> usize {
        self.inner.stack.read().len()
    }

    /// Addressing details of every hop, outermost first
    pub fn hops(&self) -> Vec<HopInfo> {
        self.inner.stack.read().infos()
    }

    /// Snapshot of the connection stack
    pub fn stack(&self) -> ConnectionStack {
        self.inner.stack.read().clone()
    }

    /// Session this one was chained from
    pub fn parent(&self) -> Option<&RemoteSession> {
        self.inner.parent.as_ref()
    }

    /// Live sessions chained from this one
    pub fn children(&self) -> Vec<RemoteSession> {
        let mut children = self.inner.children.lock();
        children.retain(ChildLink::is_pending);
        children
            .iter()
            .filter_map(|link| link.session.upgrade())
            .map(RemoteSession::from_inner)
            .collect()
    }

    /// Execution state, possibly shared with the parent session
    pub fn state(&self) -> &ExecutionState {
        &self.inner.state
    }

    /// Tunnel manager of this session
    pub fn tunnels(&self) -> &TunnelManager {
        &self.inner.tunnels
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut protocols: BTreeSet<String> = PROTOCOLS.iter().map(|s| s.to_string()).collect();
        let mut actions: BTreeSet<String> = ACTIONS.iter().map(|s| s.to_string()).collect();
        if self.has_scp() {
            protocols.insert(SCP.to_string());
            actions.extend(SCP_ACTIONS.iter().map(|s| s.to_string()));
        }
        Capabilities { protocols, actions }
    }

    /// Transport for protocol `name`
    ///
    /// `"scp"` is only available after [`expand_scp`](Self::expand_scp);
    /// it is carried by the same hop as `"ssh"`.
    pub fn protocol(&self, name: &str) -> Result<Arc<dyn Transport>, HlError> {
        if PROTOCOLS.contains(&name) || (name == SCP && self.has_scp()) {
            Ok(self.default_layer())
        } else {
            Err(HlError::ProtocolNotAvailable(name.to_string()))
        }
    }

    /// Attach file transfer over the default hop's SSH connection
    ///
    /// Idempotent. Chained sessions start without it.
    pub fn expand_scp(&self) {
        if !self.inner.scp.swap(true, Ordering::AcqRel) {
            tracing::debug!("Attached scp to {}", self.default_layer().info());
        }
    }

    fn has_scp(&self) -> bool {
        self.inner.scp.load(Ordering::Acquire)
    }

    /// File transfer through the default hop
    pub fn scp(&self) -> Result<ScpProtocol, HlError> {
        if self.has_scp() {
            Ok(ScpProtocol::new(self.default_layer()))
        } else {
            Err(HlError::ProtocolNotAvailable(SCP.to_string()))
        }
    }

    /// Fail with `PermissionDenied` unless the seeded uid is 0
    pub fn ensure_root(&self) -> Result<(), HlError> {
        if self.inner.state.is_root() {
            Ok(())
        } else {
            Err(HlError::PermissionDenied(format!(
                "root required, running as uid {:?}",
                self.inner.state.uid()
            )))
        }
    }

    /// Fail with `PermissionDenied` unless `sudo -n true` succeeded at connect
    pub fn ensure_sudo(&self) -> Result<(), HlError> {
        if self.inner.state.has_sudo() {
            Ok(())
        } else {
            Err(HlError::PermissionDenied(
                "passwordless sudo is not available".to_string(),
            ))
        }
    }

    /// Whether both handles point at the same session
    pub fn ptr_eq(&self, other: &RemoteSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.inner.connector
    }

    /// Build the child session for a freshly authenticated hop
    pub(crate) fn chain(&self, layer: Arc<dyn Transport>, mode: StateMode) -> RemoteSession {
        let stack = self.inner.stack.read().chained(Arc::clone(&layer));
        let state = match mode {
            StateMode::Shared => self.inner.state.clone(),
            StateMode::Forked => self.inner.state.fork(),
        };

        let child = SessionBuilder::from_stack(stack, Arc::clone(&self.inner.connector))
            .state(state)
            .tunnel_config(self.inner.tunnels.config().clone())
            .parent(self.clone())
            .build();

        self.inner.children.lock().push(ChildLink {
            session: Arc::downgrade(&child.inner),
            hop: layer,
            tunnels: child.inner.tunnels.registry().clone(),
        });
        child
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("hops", &self.hops())
            .field("tunnels", &self.inner.tunnels.len())
            .finish()
    }
}
