//! Exec command implementation

use std::io::Write;

use anyhow::{Context, Result};

use hl_core::config::HoplineConfig;

use super::{open_session, Target};

/// Run `command` on the target and return its exit code
///
/// `env` entries are `KEY=VALUE`.
pub async fn exec_command(
    config: &HoplineConfig,
    target: &Target,
    command: &[String],
    cwd: Option<&str>,
    env: &[String],
) -> Result<i32> {
    let vars = env
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got '{}'", entry))
        })
        .collect::<Result<Vec<_>>>()?;

    let session = open_session(config, target).await?;
    if let Some(cwd) = cwd {
        session.state().set_cwd(cwd);
    }
    for (key, value) in vars {
        session.state().env_set(key, value);
    }

    let result = session.execute(&command.join(" ")).await;
    if let Err(e) = session.disconnect().await {
        tracing::warn!("Failed to disconnect cleanly: {}", e);
    }
    let result = result.context("Failed to run command")?;

    std::io::stdout().write_all(result.stdout.as_bytes())?;
    std::io::stderr().write_all(result.stderr.as_bytes())?;
    Ok(result.exit_code)
}
