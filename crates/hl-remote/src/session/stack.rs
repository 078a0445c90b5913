//! Ordered hops of one session

use std::fmt;
use std::sync::Arc;

use hl_core::{HopInfo, Transport, TransportError};

/// One slot of a connection stack
#[derive(Clone)]
pub struct Hop {
    pub layer: Arc<dyn Transport>,
    /// Only owned hops are connected and torn down by this stack
    pub owned: bool,
}

impl fmt::Debug for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hop")
            .field("info", self.layer.info())
            .field("owned", &self.owned)
            .field("connected", &self.layer.is_connected())
            .finish()
    }
}

/// Hops of a session, index 0 first, the last one innermost
///
/// The innermost hop is the default target for commands and tunnels.
#[derive(Debug, Clone)]
pub struct ConnectionStack {
    hops: Vec<Hop>,
}

impl ConnectionStack {
    /// Stack with a single owned hop
    pub fn new(root: Arc<dyn Transport>) -> Self {
        Self {
            hops: vec![Hop {
                layer: root,
                owned: true,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Hop at `index`; negative values count back from the innermost
    pub fn connection_layer(&self, index: isize) -> Result<Arc<dyn Transport>, TransportError> {
        let depth = self.hops.len();
        let resolved = if index < 0 {
            depth.checked_sub(index.unsigned_abs())
        } else {
            Some(index as usize)
        };

        resolved
            .and_then(|i| self.hops.get(i))
            .map(|hop| Arc::clone(&hop.layer))
            .ok_or(TransportError::InvalidHop { index, depth })
    }

    /// Append an owned hop; it becomes the default
    pub fn add_ssh_layer(&mut self, layer: Arc<dyn Transport>) {
        self.hops.push(Hop { layer, owned: true });
    }

    /// Copy of this stack plus `layer`, for a chained session
    ///
    /// Inherited hops are marked not owned.
    pub fn chained(&self, layer: Arc<dyn Transport>) -> Self {
        let mut hops: Vec<Hop> = self
            .hops
            .iter()
            .map(|hop| Hop {
                layer: Arc::clone(&hop.layer),
                owned: false,
            })
            .collect();
        hops.push(Hop { layer, owned: true });
        Self { hops }
    }

    /// Every hop, outermost first
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn infos(&self) -> Vec<HopInfo> {
        self.hops.iter().map(|hop| hop.layer.info().clone()).collect()
    }

    /// Connect owned hops that are down, outermost first
    pub async fn connect(&self) -> Result<(), TransportError> {
        for hop in self.hops.iter().filter(|hop| hop.owned) {
            if !hop.layer.is_connected() {
                hop.layer.connect().await?;
            }
        }
        Ok(())
    }

    /// Disconnect owned hops, innermost first
    ///
    /// Keeps going past failures and reports the first one.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let mut first_error = None;
        for hop in self.hops.iter().rev().filter(|hop| hop.owned) {
            if let Err(e) = hop.layer.disconnect().await {
                tracing::warn!("Failed to disconnect {}: {}", hop.layer.info(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
