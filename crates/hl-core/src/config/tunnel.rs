//! Tunnel subsystem configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Timeouts and sizes used by tunnels, relays and chained handshakes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// How long a reverse accept loop waits for one forwarded channel
    #[serde(with = "duration_millis")]
    pub accept_timeout: Duration,

    /// How often accept loops re-check that their transport is still up
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Bound on the authentication handshake of a chained hop
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Bound on dialing a tunnel's local endpoint or a reverse target
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,

    /// Per-direction read buffer of a relay
    pub relay_buffer_size: usize,

    /// Capacity of the tunnel event broadcast channel
    pub event_capacity: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            relay_buffer_size: 4096,
            event_capacity: 256,
        }
    }
}
