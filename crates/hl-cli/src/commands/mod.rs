//! CLI command implementations

mod caps;
mod config;
mod exec;
mod forward;
mod transfer;

pub use caps::caps_command;
pub use config::{config_init, config_path, config_show};
pub use exec::exec_command;
pub use forward::{forward_command, reverse_command, ForwardSpec};
pub use transfer::{transfer_command, Transfer};

use std::path::PathBuf;

use anyhow::{Context, Result};

use hl_core::config::HoplineConfig;
use hl_core::AuthMethod;
use hl_remote::RemoteSession;

/// Where and how to reach the first hop
#[derive(Debug, Clone)]
pub struct Target {
    /// Profile name or `[user@]host[:port]`
    pub name: String,
    /// Private key overriding the configured auth
    pub identity: Option<PathBuf>,
}

/// Resolve `target` against the config and connect a session to it
pub async fn open_session(config: &HoplineConfig, target: &Target) -> Result<RemoteSession> {
    let mut ssh = config
        .resolve_target(&target.name)
        .with_context(|| format!("Invalid target '{}'", target.name))?;
    if let Some(path) = &target.identity {
        ssh.auth = AuthMethod::Key {
            path: path.clone(),
            passphrase: None,
        };
    }

    tracing::info!("Connecting to {}@{}:{}", ssh.user, ssh.host, ssh.port);
    let session = hl_remote::ssh_with(ssh, config.tunnel.clone());
    session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", target.name))?;
    Ok(session)
}
