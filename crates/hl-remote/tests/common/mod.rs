//! Shared helpers for hl-remote integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use hl_core::config::TunnelConfig;
use hl_core::testing::{self, MockConnector, MockTransport};
use hl_remote::{RemoteSession, SessionBuilder, TunnelEvent, TunnelId};

/// Tunnel settings short enough to keep tests fast
pub fn fast_config() -> TunnelConfig {
    TunnelConfig {
        accept_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(2),
        dial_timeout: Duration::from_secs(2),
        ..TunnelConfig::default()
    }
}

/// Session over a connected mock hop named `host`
pub fn session(host: &str) -> (RemoteSession, Arc<MockTransport>, Arc<MockConnector>) {
    session_with(host, fast_config())
}

pub fn session_with(
    host: &str,
    config: TunnelConfig,
) -> (RemoteSession, Arc<MockTransport>, Arc<MockConnector>) {
    let hop = MockTransport::connected(host);
    let connector = Arc::new(MockConnector::new());
    let session = SessionBuilder::new(hop.clone(), connector.clone())
        .tunnel_config(config)
        .build();
    (session, hop, connector)
}

/// Echo every direct channel opened through `hop`
pub fn echo_destinations(hop: &MockTransport) {
    let requests = hop.take_direct_requests().expect("direct requests already taken");
    testing::serve_destinations(requests, |request| testing::echo(request.stream));
}

/// Answer the mock handshake on every direct channel opened through `hop`
pub fn auth_destinations(hop: &MockTransport, password: &str) {
    let requests = hop.take_direct_requests().expect("direct requests already taken");
    let password = password.to_string();
    testing::serve_destinations(requests, move |request| {
        testing::auth_gate(request.stream, password.clone())
    });
}

/// Local TCP echo server, returns its port
pub async fn local_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// Poll `check` until it holds or `limit` passes
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the first event about `id` matching `pred`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<TunnelEvent>,
    id: TunnelId,
    mut pred: F,
) -> TunnelEvent
where
    F: FnMut(&TunnelEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if event.tunnel_id() == id && pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}
