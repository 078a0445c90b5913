//! SSH hop configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, option_duration_secs};
use crate::error::ConfigError;
use crate::types::{AuthMethod, Credentials, HopInfo};

/// Connection settings for one SSH hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote hostname or IP
    pub host: String,

    /// Remote SSH port
    pub port: u16,

    /// Login user
    pub user: String,

    /// How to authenticate
    pub auth: AuthMethod,

    /// Bound on TCP connect plus SSH handshake
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Keepalive interval, disabled when absent
    #[serde(with = "option_duration_secs", skip_serializing_if = "Option::is_none")]
    pub keepalive_interval: Option<Duration>,

    /// Expected server key fingerprint (SHA-256, as printed by ssh-keygen -l)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_host_key: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            user: whoami::username(),
            auth: AuthMethod::Key {
                path: default_key_path(),
                passphrase: None,
            },
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: None,
            expected_host_key: None,
        }
    }
}

impl SshConfig {
    /// Parse a `[user@]host[:port]` target on top of these defaults
    pub fn with_target(mut self, target: &str) -> Result<Self, ConfigError> {
        let (user, rest) = match target.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, target),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("Invalid port in '{}'", target)))?;
                (host, Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(ConfigError::Invalid(format!("Missing host in '{}'", target)));
        }
        if let Some(user) = user {
            if user.is_empty() {
                return Err(ConfigError::Invalid(format!("Empty user in '{}'", target)));
            }
            self.user = user.to_string();
        }

        self.host = host.to_string();
        if let Some(port) = port {
            self.port = port;
        }
        Ok(self)
    }

    /// Credentials for this hop
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            auth: self.auth.clone(),
        }
    }

    /// Addressing details for introspection
    pub fn hop_info(&self) -> HopInfo {
        HopInfo::new(&self.host, self.port, &self.user)
    }
}

fn default_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".ssh")
        .join("id_ed25519")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_target_full() {
        let config = SshConfig::default().with_target("ops@bastion:2222").unwrap();
        assert_eq!(config.user, "ops");
        assert_eq!(config.host, "bastion");
        assert_eq!(config.port, 2222);
    }

    #[test]
    fn test_with_target_host_only_keeps_defaults() {
        let base = SshConfig {
            user: "deploy".to_string(),
            ..Default::default()
        };
        let config = base.with_target("10.0.0.5").unwrap();
        assert_eq!(config.user, "deploy");
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 22);
    }

    #[test]
    fn test_with_target_rejects_bad_input() {
        assert!(SshConfig::default().with_target("host:notaport").is_err());
        assert!(SshConfig::default().with_target("@host").is_err());
        assert!(SshConfig::default().with_target("ops@").is_err());
    }

    #[test]
    fn test_auth_from_toml() {
        let toml_str = r#"
            host = "db"
            user = "admin"

            [auth]
            method = "password"
            password = "s3cret"
        "#;
        let config: SshConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(
            config.auth,
            AuthMethod::Password {
                password: "s3cret".to_string()
            }
        );
    }
}
