//! Accept loops driving forward and reverse tunnels

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use hl_core::config::TunnelConfig;
use hl_core::{DuplexChannel, ForwardedChannel, TransportError};

use super::events::{StopReason, TunnelEvent};
use super::pipe::Pipe;
use super::registry::TunnelRegistry;
use super::types::Tunnel;

/// Everything an accept loop needs besides its listener
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub tunnel: Arc<Tunnel>,
    /// Registries the tunnel is listed in, cleaned up on exit
    pub registries: Vec<TunnelRegistry>,
    pub events: broadcast::Sender<TunnelEvent>,
    pub config: TunnelConfig,
}

impl LoopContext {
    fn emit(&self, event: TunnelEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn finish(&self, reason: StopReason) {
        self.tunnel.stop();
        for registry in &self.registries {
            registry.remove(&self.tunnel.id());
        }

        match &reason {
            StopReason::Requested => {
                tracing::debug!(tunnel = %self.tunnel.id(), "Accept loop stopped")
            }
            StopReason::TransportLost => {
                tracing::warn!(tunnel = %self.tunnel.id(), "Hop disconnected, tunnel {} closed", self.tunnel)
            }
            StopReason::ListenerFailed(e) => {
                tracing::warn!(tunnel = %self.tunnel.id(), "Tunnel {} failed: {}", self.tunnel, e)
            }
        }

        self.emit(TunnelEvent::Stopped {
            id: self.tunnel.id(),
            reason,
        });
    }

    /// Relay between an accepted endpoint and a channel until either ends
    async fn relay<A>(&self, a: A, b: DuplexChannel, peer: String)
    where
        A: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let pipe = Pipe::new(
            a,
            b,
            self.tunnel.cancel_token().child_token(),
            self.config.relay_buffer_size,
        );
        self.tunnel.track_pipe(&pipe.stats());
        self.emit(TunnelEvent::ConnectionOpened {
            id: self.tunnel.id(),
            peer,
        });

        let outcome = pipe.run().await;
        self.emit(TunnelEvent::ConnectionClosed {
            id: self.tunnel.id(),
            a_to_b: outcome.a_to_b,
            b_to_a: outcome.b_to_a,
            reason: outcome.reason,
        });
    }

    fn relay_failed(&self, error: String) {
        tracing::warn!(tunnel = %self.tunnel.id(), "Connection setup failed: {}", error);
        self.emit(TunnelEvent::RelayFailed {
            id: self.tunnel.id(),
            error,
        });
    }
}

/// Accept local connections and relay each through a direct channel
pub(crate) async fn run_forward(listener: TcpListener, ctx: LoopContext) {
    let tunnel = Arc::clone(&ctx.tunnel);
    let cancel = tunnel.cancel_token().clone();
    let mut liveness = tokio::time::interval(ctx.config.poll_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break StopReason::Requested,

            _ = liveness.tick() => {
                if !tunnel.transport().is_connected() {
                    break StopReason::TransportLost;
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    if !tunnel.transport().is_connected() {
                        break StopReason::TransportLost;
                    }
                    tracing::debug!(tunnel = %tunnel.id(), peer = %peer, "Accepted connection");
                    tokio::spawn(forward_connection(ctx.clone(), socket, peer));
                }
                Err(e) => {
                    tracing::error!(tunnel = %tunnel.id(), "Failed to accept connection: {}", e);
                }
            },
        }
    };

    drop(listener);
    ctx.finish(reason);
}

async fn forward_connection(ctx: LoopContext, socket: TcpStream, peer: SocketAddr) {
    let tunnel = &ctx.tunnel;
    let destination = (tunnel.remote_host(), tunnel.remote_port());

    let channel = tokio::select! {
        _ = tunnel.cancel_token().cancelled() => return,
        opened = tunnel.transport().open_direct_channel(destination, peer) => opened,
    };

    match channel {
        Ok(channel) => ctx.relay(socket, channel, peer.to_string()).await,
        Err(e) => ctx.relay_failed(format!(
            "channel to {}:{} for {}: {}",
            destination.0, destination.1, peer, e
        )),
    }
}

/// Wait for forwarded channels and relay each to the local destination
pub(crate) async fn run_reverse(bind_addr: String, ctx: LoopContext) {
    let tunnel = Arc::clone(&ctx.tunnel);
    let transport = Arc::clone(tunnel.transport());
    let cancel = tunnel.cancel_token().clone();
    let port = tunnel.remote_port();

    let reason = loop {
        if !transport.is_connected() {
            break StopReason::TransportLost;
        }

        let accepted = tokio::select! {
            _ = cancel.cancelled() => break StopReason::Requested,
            accepted = transport.accept_forwarded_channel(port, ctx.config.accept_timeout) => accepted,
        };

        match accepted {
            Ok(Some(channel)) => {
                tokio::spawn(reverse_connection(ctx.clone(), channel));
            }
            Ok(None) => continue,
            Err(_) if !transport.is_connected() => break StopReason::TransportLost,
            Err(e) => break StopReason::ListenerFailed(e.to_string()),
        }
    };

    if transport.is_connected() {
        if let Err(e) = transport.cancel_remote_forward(&bind_addr, port).await {
            tracing::debug!(tunnel = %tunnel.id(), "Failed to cancel remote forward: {}", e);
        }
    }
    ctx.finish(reason);
}

async fn reverse_connection(ctx: LoopContext, channel: ForwardedChannel) {
    let tunnel = &ctx.tunnel;
    let peer = format!("{}:{}", channel.originator, channel.originator_port);
    let target = (tunnel.local_host(), tunnel.local_port());

    let dialed = tokio::select! {
        _ = tunnel.cancel_token().cancelled() => return,
        dialed = tokio::time::timeout(ctx.config.dial_timeout, TcpStream::connect(target)) => dialed,
    };

    let socket = match dialed {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            ctx.relay_failed(format!("dial {}:{} for {}: {}", target.0, target.1, peer, e));
            return;
        }
        Err(_) => {
            let err = TransportError::Timeout {
                operation: "dial",
                duration: ctx.config.dial_timeout,
            };
            ctx.relay_failed(format!("{}:{} for {}: {}", target.0, target.1, peer, err));
            return;
        }
    };

    tracing::debug!(tunnel = %tunnel.id(), peer = %peer, "Forwarded connection");
    ctx.relay(socket, channel.stream, peer).await;
}
