//! Forward and reverse command implementations

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};

use hl_core::config::HoplineConfig;
use hl_remote::{
    ForwardRequest, RemoteSession, ReverseRequest, StopReason, Tunnel, TunnelEvent,
};

use super::{open_session, Target};
use crate::output::{format_tunnels, print_info, print_success, print_warning};

/// A `[bind:]port:host:hostport` tunnel spec, as in `ssh -L` and `ssh -R`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub bind: Option<String>,
    pub port: u16,
    pub host: String,
    pub host_port: u16,
}

impl FromStr for ForwardSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (bind, rest) = match parts.len() {
            3 => (None, &parts[..]),
            4 => (Some(parts[0]), &parts[1..]),
            _ => return Err(format!("expected [bind:]port:host:hostport, got '{}'", s)),
        };

        let port_of = |value: &str| {
            value
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}'", value))
        };
        if rest[1].is_empty() {
            return Err(format!("missing host in '{}'", s));
        }
        if bind == Some("") {
            return Err(format!("empty bind address in '{}'", s));
        }

        Ok(Self {
            bind: bind.map(str::to_string),
            port: port_of(rest[0])?,
            host: rest[1].to_string(),
            host_port: port_of(rest[2])?,
        })
    }
}

/// Hold a forward tunnel open until Ctrl-C or until it dies
pub async fn forward_command(config: &HoplineConfig, target: &Target, spec: ForwardSpec) -> Result<()> {
    let session = open_session(config, target).await?;

    let mut request = ForwardRequest::new(spec.port, spec.host, spec.host_port);
    if let Some(bind) = spec.bind {
        request = request.local_host(bind);
    }
    let tunnel = session
        .tunnels()
        .forward_with(request)
        .await
        .context("Failed to start forward tunnel")?;

    print_success(&format!(
        "Forwarding {}:{} via {}",
        tunnel.local_host(),
        tunnel.local_port(),
        target.name
    ));
    hold(&session, tunnel).await
}

/// Hold a reverse tunnel open until Ctrl-C or until it dies
pub async fn reverse_command(config: &HoplineConfig, target: &Target, spec: ForwardSpec) -> Result<()> {
    let session = open_session(config, target).await?;

    let mut request = ReverseRequest::new(spec.port, spec.host, spec.host_port);
    if let Some(bind) = spec.bind {
        request = request.bind_addr(bind);
    }
    let tunnel = session
        .tunnels()
        .reverse_with(request)
        .await
        .context("Failed to start reverse tunnel")?;

    print_success(&format!(
        "Remote port {} on {} now reaches {}:{}",
        tunnel.remote_port(),
        target.name,
        tunnel.local_host(),
        tunnel.local_port()
    ));
    hold(&session, tunnel).await
}

async fn hold(session: &RemoteSession, tunnel: Arc<Tunnel>) -> Result<()> {
    println!("{}", format_tunnels(&session.tunnels().list()));
    print_info("Press Ctrl-C to stop");

    let mut events = session.tunnels().subscribe();
    let stopped = async {
        loop {
            match events.recv().await {
                Ok(TunnelEvent::Stopped { id, reason }) if id == tunnel.id() => return reason,
                Ok(TunnelEvent::RelayFailed { error, .. }) => print_warning(&error),
                Ok(event) => tracing::debug!("{:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Skipped {} tunnel events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return StopReason::Requested
                }
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        reason = stopped => {
            print_warning(&format!("Tunnel stopped: {:?}", reason));
        }
    }

    session.disconnect().await?;
    print_success("Disconnected");
    Ok(())
}
