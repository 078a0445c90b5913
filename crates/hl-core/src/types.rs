//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for one transport hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HopId(pub Uuid);

impl HopId {
    /// Allocate a fresh hop ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HopId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell hops apart in logs
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Addressing details of a hop, for introspection and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopInfo {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login user
    pub user: String,
}

impl HopInfo {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }
}

impl fmt::Display for HopInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// The machine a chained hop authenticates against
///
/// Only used for naming: the bytes travel through the tunnel's local
/// endpoint, whatever `host` says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopTarget {
    pub host: String,
    pub port: u16,
}

impl HopTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// How a hop proves its identity
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },
    /// Private key file, optionally encrypted
    Key {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f.write_str("Password(<redacted>)"),
            AuthMethod::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// User plus authentication method for one hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub auth: AuthMethod,
}

impl Credentials {
    /// Password credentials
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            auth: AuthMethod::Password {
                password: password.into(),
            },
        }
    }

    /// Unencrypted key-file credentials
    pub fn key(user: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            auth: AuthMethod::Key {
                path: path.into(),
                passphrase: None,
            },
        }
    }
}

/// Protocols and actions a session offers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocols: BTreeSet<String>,
    pub actions: BTreeSet<String>,
}

impl Capabilities {
    pub fn has_protocol(&self, name: &str) -> bool {
        self.protocols.contains(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains(name)
    }
}

/// Outcome of one file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub source: String,
    pub destination: String,
    pub bytes_transferred: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_id_display_is_short() {
        let id = HopId::new();
        assert_eq!(id.to_string().len(), 8);
        assert_ne!(HopId::new(), id);
    }

    #[test]
    fn test_hop_info_display() {
        let info = HopInfo::new("bastion", 2222, "ops");
        assert_eq!(info.to_string(), "ops@bastion:2222");
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let creds = Credentials::password("ops", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
