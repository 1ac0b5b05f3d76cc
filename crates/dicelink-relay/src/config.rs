//! Relay hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default port the relay listens on.
pub const RELAY_PORT: u16 = 47800;

/// Settings for a [`RelayServer`](crate::RelayServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address to accept WebSocket connections on.
    pub bind_addr: String,

    /// How long a new client has to send its `hello` call.
    pub hello_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{RELAY_PORT}"),
            hello_timeout: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Loopback on an OS-assigned port.
    pub fn loopback() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}
