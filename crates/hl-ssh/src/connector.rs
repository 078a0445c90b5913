//! Authentication and tunnel bootstrap for SSH hops

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use hl_core::{AuthMethod, Connector, Credentials, HopInfo, HopTarget, Transport, TransportError};

use crate::handler::{ClientHandler, ForwardTable};
use crate::transport::SshTransport;

/// russh client settings shared by dialed and bootstrapped hops
pub(crate) fn client_config(keepalive_interval: Option<Duration>) -> Arc<Config> {
    Arc::new(Config {
        keepalive_interval,
        ..Default::default()
    })
}

/// Authenticate `handle` with `credentials`
///
/// A clean rejection maps to `AuthenticationError`. Key loading and
/// protocol failures map to `Ssh`.
pub(crate) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    credentials: &Credentials,
    host: &str,
) -> Result<(), TransportError> {
    tracing::debug!("Authenticating as user '{}'", credentials.user);

    let accepted = match &credentials.auth {
        AuthMethod::Password { password } => handle
            .authenticate_password(&credentials.user, password)
            .await
            .map_err(|e| TransportError::Ssh(format!("Authentication error: {}", e)))?,
        AuthMethod::Key { path, passphrase } => {
            let key = russh_keys::load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                TransportError::Ssh(format!("Failed to load key {}: {}", path.display(), e))
            })?;
            handle
                .authenticate_publickey(&credentials.user, Arc::new(key))
                .await
                .map_err(|e| TransportError::Ssh(format!("Authentication error: {}", e)))?
        }
    };

    if !accepted {
        return Err(TransportError::AuthenticationError {
            user: credentials.user.clone(),
            host: host.to_string(),
        });
    }
    Ok(())
}

/// Bootstraps SSH hops over streams dialed through a tunnel
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    keepalive_interval: Option<Duration>,
    expected_host_key: Option<String>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send keepalives on bootstrapped hops
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Refuse servers whose key fingerprint differs
    pub fn expected_host_key(mut self, fingerprint: impl Into<String>) -> Self {
        self.expected_host_key = Some(fingerprint.into());
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn handshake(
        &self,
        stream: TcpStream,
        target: &HopTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let forwards = ForwardTable::new();
        let handler = ClientHandler::new(
            target.host.clone(),
            self.expected_host_key.clone(),
            forwards.clone(),
        );

        let mut handle =
            client::connect_stream(client_config(self.keepalive_interval), stream, handler)
                .await
                .map_err(|e| {
                    TransportError::Ssh(format!("Handshake with {} failed: {}", target.host, e))
                })?;

        authenticate(&mut handle, credentials, &target.host).await?;

        let info = HopInfo::new(&target.host, target.port, &credentials.user);
        tracing::info!("Bootstrapped hop {}", info);
        Ok(Arc::new(SshTransport::from_handle(info, handle, forwards)))
    }
}
