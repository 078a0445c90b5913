//! russh client callbacks

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use russh::client::{self, Msg};
use russh::Channel;
use russh_keys::key::PublicKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use hl_core::ForwardedChannel;

/// Queue of forwarded channels for one registered port
struct ForwardQueue {
    tx: mpsc::UnboundedSender<ForwardedChannel>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<ForwardedChannel>>>,
}

impl ForwardQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// Registered remote forwards, keyed by bound port
///
/// Shared between the transport and its handler. A channel may arrive
/// before the task that requested the forward sees the server's reply, so
/// queues are reserved up front and early channels are parked while any
/// request is in flight.
#[derive(Clone, Default)]
pub(crate) struct ForwardTable {
    queues: Arc<DashMap<u16, ForwardQueue>>,
    in_flight: Arc<AtomicUsize>,
}

impl ForwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a `tcpip-forward` request for `port`
    ///
    /// A fixed port gets its queue immediately. Dropping the returned guard
    /// without [`PendingForward::complete`] releases that queue again.
    pub fn begin(&self, port: u16) -> PendingForward<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let reserved = match self.queues.entry(port) {
            Entry::Vacant(slot) if port != 0 => {
                slot.insert(ForwardQueue::new());
                true
            }
            _ => false,
        };
        PendingForward {
            table: self,
            port,
            reserved,
            completed: false,
        }
    }

    /// Sender for a channel forwarded on `port`, `None` when nobody can claim it
    pub fn sender(&self, port: u16) -> Option<mpsc::UnboundedSender<ForwardedChannel>> {
        if let Some(queue) = self.queues.get(&port) {
            return Some(queue.tx.clone());
        }
        if self.in_flight.load(Ordering::Acquire) == 0 {
            return None;
        }
        let queue = self.queues.entry(port).or_insert_with(ForwardQueue::new);
        Some(queue.tx.clone())
    }

    pub fn receiver(&self, port: u16) -> Option<Arc<Mutex<mpsc::UnboundedReceiver<ForwardedChannel>>>> {
        self.queues.get(&port).map(|queue| queue.rx.clone())
    }

    pub fn remove(&self, port: u16) {
        self.queues.remove(&port);
    }

    pub fn clear(&self) {
        self.queues.clear();
    }
}

/// An in-flight forward request, see [`ForwardTable::begin`]
pub(crate) struct PendingForward<'a> {
    table: &'a ForwardTable,
    port: u16,
    reserved: bool,
    completed: bool,
}

impl PendingForward<'_> {
    /// The server accepted the forward on `bound`
    pub fn complete(mut self, bound: u16) {
        self.table
            .queues
            .entry(bound)
            .or_insert_with(ForwardQueue::new);
        self.completed = true;
    }
}

impl Drop for PendingForward<'_> {
    fn drop(&mut self) {
        if !self.completed && self.reserved {
            self.table.queues.remove(&self.port);
        }
        self.table.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handler installed on every hopline SSH session
pub(crate) struct ClientHandler {
    host: String,
    /// Expected host key fingerprint
    expected_host_key: Option<String>,
    forwards: ForwardTable,
}

impl ClientHandler {
    pub fn new(host: String, expected_host_key: Option<String>, forwards: ForwardTable) -> Self {
        Self {
            host,
            expected_host_key,
            forwards,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!(host = %self.host, "Server host key: {}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if *expected != fingerprint => {
                tracing::error!(
                    host = %self.host,
                    "Host key mismatch: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let port = connected_port as u16;
        tracing::trace!(
            "Forwarded connection on {}:{} from {}:{}",
            connected_address,
            port,
            originator_address,
            originator_port
        );

        let Some(sender) = self.forwards.sender(port) else {
            tracing::warn!(host = %self.host, "Forwarded channel for unregistered port {}", port);
            let _ = channel.close().await;
            return Ok(());
        };

        let forwarded = ForwardedChannel {
            stream: Box::new(channel.into_stream()),
            connected_port: port,
            originator: originator_address.to_string(),
            originator_port: originator_port as u16,
        };

        if sender.send(forwarded).is_err() {
            tracing::debug!("Forward queue for port {} already closed", port);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(port: u16) -> ForwardedChannel {
        let (stream, _peer) = tokio::io::duplex(64);
        ForwardedChannel {
            stream: Box::new(stream),
            connected_port: port,
            originator: "203.0.113.7".to_string(),
            originator_port: 51000,
        }
    }

    async fn next(table: &ForwardTable, port: u16) -> ForwardedChannel {
        let rx = table.receiver(port).unwrap();
        let mut rx = rx.lock().await;
        rx.recv().await.unwrap()
    }

    #[test]
    fn test_unregistered_port_is_refused() {
        let table = ForwardTable::new();
        assert!(table.sender(2222).is_none());
        assert!(table.receiver(2222).is_none());
    }

    #[tokio::test]
    async fn test_fixed_port_accepts_channels_before_reply() {
        let table = ForwardTable::new();
        let pending = table.begin(8080);

        // Server forwards a connection before the request task resumes
        table.sender(8080).unwrap().send(forwarded(8080)).unwrap();
        pending.complete(8080);

        let channel = next(&table, 8080).await;
        assert_eq!(channel.connected_port, 8080);
        assert_eq!(channel.originator, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_assigned_port_keeps_early_channels() {
        let table = ForwardTable::new();
        let pending = table.begin(0);

        table.sender(40001).unwrap().send(forwarded(40001)).unwrap();
        pending.complete(40001);

        assert_eq!(next(&table, 40001).await.connected_port, 40001);
        // Nothing in flight any more
        assert!(table.sender(40002).is_none());
    }

    #[test]
    fn test_rejected_request_releases_queue() {
        let table = ForwardTable::new();
        drop(table.begin(8080));
        assert!(table.sender(8080).is_none());
    }

    #[test]
    fn test_rejected_duplicate_keeps_existing_forward() {
        let table = ForwardTable::new();
        table.begin(22).complete(22);
        drop(table.begin(22));
        assert!(table.sender(22).is_some());
    }
}
