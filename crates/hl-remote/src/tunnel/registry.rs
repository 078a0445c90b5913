//! Registry of live tunnels

use dashmap::DashMap;
use std::sync::Arc;

use hl_core::HopId;

use super::types::{Tunnel, TunnelId};

/// Concurrent map of tunnels, cheap to clone
///
/// Clones share the same entries. Tunnels are removed when their accept
/// loop ends, so the registry only ever lists live tunnels.
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Arc<DashMap<TunnelId, Arc<Tunnel>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `tunnel`, replacing any entry with the same id
    pub fn insert(&self, tunnel: Arc<Tunnel>) {
        self.tunnels.insert(tunnel.id(), tunnel);
    }

    /// Forget `id`; does not stop the tunnel
    pub fn remove(&self, id: &TunnelId) -> Option<Arc<Tunnel>> {
        self.tunnels.remove(id).map(|(_, t)| t)
    }

    pub fn get(&self, id: &TunnelId) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of every tracked tunnel, in no particular order
    pub fn list(&self) -> Vec<Arc<Tunnel>> {
        self.tunnels.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Tunnels serviced by `hop`
    pub fn for_hop(&self, hop: HopId) -> Vec<Arc<Tunnel>> {
        self.tunnels
            .iter()
            .filter(|r| r.value().hop_id() == hop)
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}
