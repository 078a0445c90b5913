//! Caps command implementation

use anyhow::Result;
use serde_json::json;

use hl_core::config::HoplineConfig;
use hl_remote::RemoteSession;

use super::{open_session, Target};

/// Print capabilities and seeded state of the target as JSON
pub async fn caps_command(config: &HoplineConfig, target: &Target) -> Result<()> {
    let session = open_session(config, target).await?;
    let report = report(&session);
    session.disconnect().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn report(session: &RemoteSession) -> serde_json::Value {
    let state = session.state();
    json!({
        "hops": session.hops(),
        "capabilities": session.capabilities(),
        "state": {
            "cwd": state.cwd(),
            "uid": state.uid(),
            "has_sudo": state.has_sudo(),
            "env": state.env_all(),
        },
    })
}
