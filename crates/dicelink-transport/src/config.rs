//! Transport configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use dicelink_protocol::discovery::{DISCOVERY_PORT, GAME_PORT};

/// Socket and timing settings shared by both transports.
///
/// Ports of `0` let the OS pick, which is what tests use; the chosen
/// ports are available from the transport after a session is created.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local address to bind listeners and the discovery socket to.
    pub bind_ip: IpAddr,

    /// TCP port a host accepts game connections on.
    pub game_port: u16,

    /// UDP port a host answers discovery requests on.
    pub discovery_port: u16,

    /// Where discovery requests are sent. Normally the limited broadcast
    /// address on [`DISCOVERY_PORT`].
    pub discovery_target: SocketAddr,

    /// How long [`discover_sessions`](crate::PeerTransport::discover_sessions)
    /// listens when the caller has no preference.
    pub discovery_timeout: Duration,

    /// Limit for dialling a host or hub.
    pub connect_timeout: Duration,

    /// Limit for the join handshake and for relay hub calls.
    pub request_timeout: Duration,

    /// Buffer size of the event broadcast channel. Slow subscribers that
    /// fall further behind than this see `RecvError::Lagged`.
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            game_port: GAME_PORT,
            discovery_port: DISCOVERY_PORT,
            discovery_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::BROADCAST),
                DISCOVERY_PORT,
            ),
            discovery_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl TransportConfig {
    /// Loopback-only settings with OS-assigned ports.
    pub fn loopback() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            game_port: 0,
            discovery_port: 0,
            discovery_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DISCOVERY_PORT,
            ),
            ..Self::default()
        }
    }
}
