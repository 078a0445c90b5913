//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use hl_core::config::{self, HoplineConfig};

use crate::output::{print_error, print_info, print_success, print_warning};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Print the config file, or the defaults when there is none
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Effective defaults:");
        println!();
        println!("{}", toml::to_string_pretty(&HoplineConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);
    Ok(())
}

/// Write a default config file
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &HoplineConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Add named hosts under [hosts.<alias>]");
    Ok(())
}

pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}
