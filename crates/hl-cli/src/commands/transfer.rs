//! Upload and download commands

use std::path::PathBuf;

use anyhow::{Context, Result};

use hl_core::config::HoplineConfig;
use hl_core::TransferResult;
use hl_remote::RemoteSession;

use super::{open_session, Target};
use crate::output::print_success;

/// One file copy between this machine and the target
#[derive(Debug, Clone)]
pub enum Transfer {
    Upload { local: PathBuf, remote: String },
    Download { remote: String, local: PathBuf },
}

/// Copy a file to or from the target over SFTP
pub async fn transfer_command(
    config: &HoplineConfig,
    target: &Target,
    transfer: Transfer,
) -> Result<()> {
    let session = open_session(config, target).await?;
    let result = run_transfer(&session, &transfer).await;
    if let Err(e) = session.disconnect().await {
        tracing::warn!("Failed to disconnect cleanly: {}", e);
    }
    let result = result?;

    print_success(&format!(
        "{} -> {} ({} bytes)",
        result.source, result.destination, result.bytes_transferred
    ));
    Ok(())
}

async fn run_transfer(session: &RemoteSession, transfer: &Transfer) -> Result<TransferResult> {
    session.expand_scp();
    let scp = session.scp()?;
    let result = match transfer {
        Transfer::Upload { local, remote } => scp
            .upload(local, remote)
            .await
            .with_context(|| format!("Failed to upload {}", local.display()))?,
        Transfer::Download { remote, local } => scp
            .download(remote, local)
            .await
            .with_context(|| format!("Failed to download {}", remote))?,
    };
    Ok(result)
}
