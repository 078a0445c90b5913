//! Configuration management for hopline

mod ssh;
mod tunnel;
pub mod serde_utils;

pub use ssh::SshConfig;
pub use tunnel::TunnelConfig;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::AuthMethod;

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hopline")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    Ok(toml::from_str(&content)?)
}

/// Save configuration to a file, creating parent directories
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// A named host profile; unset fields fall back to `[ssh]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostProfile {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_host_key: Option<String>,
}

/// Top-level config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoplineConfig {
    /// Defaults for every SSH hop
    pub ssh: SshConfig,

    /// Tunnel and relay tuning
    pub tunnel: TunnelConfig,

    /// Named host profiles
    pub hosts: BTreeMap<String, HostProfile>,
}

impl HoplineConfig {
    /// Load from `path`, or the default location when `None`
    ///
    /// A missing file at the default location yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_config(path),
            None => match load_config(&default_config_path()) {
                Err(ConfigError::NotFound(_)) => Ok(Self::default()),
                other => other,
            },
        }
    }

    /// Resolve a profile name or `[user@]host[:port]` into an `SshConfig`
    pub fn resolve_target(&self, target: &str) -> Result<SshConfig, ConfigError> {
        let Some(profile) = self.hosts.get(target) else {
            return self.ssh.clone().with_target(target);
        };

        let mut config = self.ssh.clone();
        config.host = profile.host.clone();
        if let Some(port) = profile.port {
            config.port = port;
        }
        if let Some(user) = &profile.user {
            config.user = user.clone();
        }
        if let Some(auth) = &profile.auth {
            config.auth = auth.clone();
        }
        if profile.expected_host_key.is_some() {
            config.expected_host_key = profile.expected_host_key.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config::<HoplineConfig>(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_then_load_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = HoplineConfig::default();
        config.tunnel.handshake_timeout = Duration::from_secs(3);
        config.hosts.insert(
            "jump".to_string(),
            HostProfile {
                host: "jump.example.com".to_string(),
                port: Some(2200),
                ..Default::default()
            },
        );

        save_config(&path, &config).unwrap();
        let loaded: HoplineConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_resolve_profile_overrides_defaults() {
        let toml_str = r#"
            [ssh]
            user = "ops"

            [hosts.db]
            host = "10.0.0.7"
            port = 2222
        "#;
        let config: HoplineConfig = toml::from_str(toml_str).unwrap();

        let db = config.resolve_target("db").unwrap();
        assert_eq!(db.host, "10.0.0.7");
        assert_eq!(db.port, 2222);
        assert_eq!(db.user, "ops");

        let direct = config.resolve_target("root@web:23").unwrap();
        assert_eq!(direct.host, "web");
        assert_eq!(direct.user, "root");
    }
}
