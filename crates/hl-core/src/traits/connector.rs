//! Hop bootstrap trait

use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;

use super::Transport;
use crate::error::TransportError;
use crate::types::{Credentials, HopTarget};

/// Builds an authenticated hop over an already-dialed stream
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run the protocol handshake and authenticate
    ///
    /// Fails with `AuthenticationError` when the credential is rejected.
    async fn handshake(
        &self,
        stream: TcpStream,
        target: &HopTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
