//! Bidirectional byte relay between two duplex endpoints

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio_util::sync::CancellationToken;

/// Why a relay ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Endpoint A reached end of stream
    EofA,
    /// Endpoint B reached end of stream
    EofB,
    /// Read or write failure on either side
    Error(String),
    /// The owning tunnel was stopped
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EofA => f.write_str("eof on client side"),
            CloseReason::EofB => f.write_str("eof on channel side"),
            CloseReason::Error(e) => write!(f, "error: {}", e),
            CloseReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Live counters of one relay
///
/// Shared by `Arc` between the relay task and anyone observing it.
#[derive(Debug)]
pub struct PipeStats {
    a_to_b: AtomicU64,
    b_to_a: AtomicU64,
    closed: AtomicBool,
    started_at: Instant,
}

impl PipeStats {
    fn new() -> Self {
        Self {
            a_to_b: AtomicU64::new(0),
            b_to_a: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Bytes written to endpoint B so far
    pub fn bytes_a_to_b(&self) -> u64 {
        self.a_to_b.load(Ordering::Relaxed)
    }

    /// Bytes written to endpoint A so far
    pub fn bytes_b_to_a(&self) -> u64 {
        self.b_to_a.load(Ordering::Relaxed)
    }

    /// Whether the relay has finished and shut its endpoints down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Claim the close; only the first caller gets `true`
    fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Final tally of a finished relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeOutcome {
    pub a_to_b: u64,
    pub b_to_a: u64,
    pub reason: CloseReason,
}

/// One relay between endpoint A (usually the accepted socket) and B
pub struct Pipe<A, B> {
    a: A,
    b: B,
    cancel: CancellationToken,
    buffer_size: usize,
    stats: Arc<PipeStats>,
}

impl<A, B> Pipe<A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(a: A, b: B, cancel: CancellationToken, buffer_size: usize) -> Self {
        Self {
            a,
            b,
            cancel,
            buffer_size: buffer_size.max(1),
            stats: Arc::new(PipeStats::new()),
        }
    }

    /// Counters for this relay, valid before and after `run`
    pub fn stats(&self) -> Arc<PipeStats> {
        Arc::clone(&self.stats)
    }

    /// Relay until either side closes, fails, or the token is cancelled
    ///
    /// Both endpoints are shut down exactly once on every exit path.
    pub async fn run(self) -> PipeOutcome {
        let Pipe {
            a,
            b,
            cancel,
            buffer_size,
            stats,
        } = self;

        let (mut a_read, mut a_write) = tokio::io::split(a);
        let (mut b_read, mut b_write) = tokio::io::split(b);

        // Directions are polled independently: a write stalled on one side
        // never blocks reads on the other.
        let reason = {
            let a_to_b = copy_one_way(
                &mut a_read,
                &mut b_write,
                buffer_size,
                &stats.a_to_b,
                CloseReason::EofA,
            );
            let b_to_a = copy_one_way(
                &mut b_read,
                &mut a_write,
                buffer_size,
                &stats.b_to_a,
                CloseReason::EofB,
            );

            tokio::select! {
                _ = cancel.cancelled() => CloseReason::Cancelled,
                reason = a_to_b => reason,
                reason = b_to_a => reason,
            }
        };

        if stats.mark_closed() {
            shutdown(&mut a_write).await;
            shutdown(&mut b_write).await;
        }
        drop((a_read, a_write, b_read, b_write));

        tracing::trace!(
            "Relay closed ({}): {} bytes a->b, {} bytes b->a",
            reason,
            stats.bytes_a_to_b(),
            stats.bytes_b_to_a()
        );

        PipeOutcome {
            a_to_b: stats.bytes_a_to_b(),
            b_to_a: stats.bytes_b_to_a(),
            reason,
        }
    }
}

/// Copy `reader` into `writer` until end of stream or failure
async fn copy_one_way<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    counter: &AtomicU64,
    on_eof: CloseReason,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return on_eof,
            Ok(n) => n,
            Err(e) => return CloseReason::Error(e.to_string()),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            return CloseReason::Error(e.to_string());
        }
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

async fn shutdown<T>(write: &mut WriteHalf<T>)
where
    T: AsyncWrite,
{
    if let Err(e) = write.shutdown().await {
        tracing::trace!("Endpoint shutdown failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relays_both_directions() {
        let (mut client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);
        let pipe = Pipe::new(a, b, CancellationToken::new(), 16);
        let handle = tokio::spawn(pipe.run());

        client.write_all(b"hello through the relay").await.unwrap();
        let mut buf = [0u8; 23];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello through the relay");

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::EofA);
        assert_eq!(outcome.a_to_b, 23);
        assert_eq!(outcome.b_to_a, 4);
    }

    #[tokio::test]
    async fn test_close_on_one_side_closes_other() {
        let (client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);
        let pipe = Pipe::new(a, b, CancellationToken::new(), 64);
        let stats = pipe.stats();
        let handle = tokio::spawn(pipe.run());

        server.shutdown().await.unwrap();
        let mut buf = [0u8; 8];
        let mut client = client;
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("client side should observe close")
            .unwrap();
        assert_eq!(n, 0);

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::EofB);
        assert!(stats.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_closes_both_endpoints() {
        let (mut client, a) = duplex(1024);
        let (b, mut server) = duplex(1024);
        let cancel = CancellationToken::new();
        let pipe = Pipe::new(a, b, cancel.clone(), 64);
        let handle = tokio::spawn(pipe.run());

        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.reason, CloseReason::Cancelled);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_duplex_transfer_larger_than_buffers() {
        const LEN: usize = 64 * 1024;
        let (client, a) = duplex(4096);
        let (b, mut server) = duplex(4096);
        let pipe = Pipe::new(a, b, CancellationToken::new(), 1024);
        let handle = tokio::spawn(pipe.run());

        // The server pushes its whole payload before reading anything back
        let server_task = tokio::spawn(async move {
            server.write_all(&vec![0xAB; LEN]).await.unwrap();
            let mut got = vec![0u8; LEN];
            server.read_exact(&mut got).await.unwrap();
            (got, server)
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let writer = tokio::spawn(async move {
            client_write.write_all(&vec![0xCD; LEN]).await.unwrap();
            client_write
        });
        let mut echoed = vec![0u8; LEN];
        tokio::time::timeout(Duration::from_secs(5), client_read.read_exact(&mut echoed))
            .await
            .expect("client should receive the server payload")
            .unwrap();
        assert!(echoed.iter().all(|&byte| byte == 0xAB));

        let (received, _server) = tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .expect("server should receive the client payload")
            .unwrap();
        assert!(received.iter().all(|&byte| byte == 0xCD));

        let client_write = writer.await.unwrap();
        drop(client_read);
        drop(client_write);
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("relay should finish once the client closes")
            .unwrap();
        assert_eq!(outcome.reason, CloseReason::EofA);
        assert_eq!(outcome.a_to_b, LEN as u64);
        assert_eq!(outcome.b_to_a, LEN as u64);
    }

    #[test]
    fn test_mark_closed_only_once() {
        let stats = PipeStats::new();
        assert!(stats.mark_closed());
        assert!(!stats.mark_closed());
    }
}
