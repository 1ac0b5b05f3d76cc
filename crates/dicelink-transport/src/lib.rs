//! Peer transports for Dicelink.
//!
//! Provides the [`PeerTransport`] trait, the contract the sync layer talks
//! to, and two implementations:
//!
//! - [`LanTransport`]: UDP broadcast discovery plus a TCP game channel with
//!   4-byte length-prefixed frames. The host relays every message it
//!   receives to every other peer.
//! - [`RelayTransport`]: the same contract over a WebSocket link to a
//!   hosted relay hub.
//!
//! Transports report what happens on the network through a broadcast
//! channel of [`TransportEvent`]s rather than callbacks; leaving a session
//! never closes that channel, so a subscriber can follow several sessions.
//!
//! # Feature Flags
//!
//! - `relay` (default): relay hub client via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod lan;
mod peers;
#[cfg(feature = "relay")]
mod relay;

pub use config::TransportConfig;
pub use error::TransportError;
pub use lan::LanTransport;
#[cfg(feature = "relay")]
pub use relay::RelayTransport;

use std::future::Future;
use std::time::Duration;

use dicelink_protocol::{
    ConnectionState, MessageBody, NetworkMessage, PeerId, PeerInfo,
    SessionInfo,
};
use tokio::sync::broadcast;

/// Something that happened on the network.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded envelope arrived. `from` is the link it came in on, which
    /// for relayed traffic is not the original sender.
    MessageReceived {
        message: NetworkMessage,
        from: PeerId,
    },
    /// A peer completed its join.
    PeerConnected(PeerInfo),
    /// A peer's link closed or failed; it is gone from the peer list.
    PeerDisconnected(PeerId),
    /// Our own link to the session changed state.
    ConnectionStateChanged(ConnectionState),
}

/// The contract every transport offers to the layers above.
///
/// Methods take `&self`: a transport is shared (behind an `Arc`) between
/// the caller and the tasks pumping its events, so implementations keep
/// their state behind interior mutability.
pub trait PeerTransport: Send + Sync + 'static {
    /// Our own peer id, stamped on every envelope we create.
    fn local_peer_id(&self) -> PeerId;

    /// Whether we currently host a session.
    fn is_host(&self) -> bool;

    /// State of our own link to the session.
    fn connection_state(&self) -> ConnectionState;

    /// A new receiver for transport events.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Wraps `body` in an envelope from us with the next sequence number.
    fn new_message(&self, body: MessageBody) -> NetworkMessage;

    /// Lists sessions that are accepting players, each once.
    fn discover_sessions(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<SessionInfo>, TransportError>> + Send;

    /// Starts hosting a session. Returns its descriptor.
    fn create_session(
        &self,
        name: &str,
        player_name: &str,
        max_players: usize,
        password: Option<String>,
    ) -> impl Future<Output = Result<SessionInfo, TransportError>> + Send;

    /// Joins a discovered session.
    fn join_session(
        &self,
        session: &SessionInfo,
        player_name: &str,
        password: Option<String>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Leaves the current session, telling the others on a best-effort
    /// basis. A no-op when not in a session.
    fn leave_session(
        &self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends to everyone in the session.
    fn send_to_all(
        &self,
        message: &NetworkMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends to one peer.
    fn send_to(
        &self,
        peer_id: &PeerId,
        message: &NetworkMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Peers we currently have a link to.
    fn peers(&self) -> impl Future<Output = Vec<PeerInfo>> + Send;

    /// The session we're in, if any.
    fn current_session(
        &self,
    ) -> impl Future<Output = Option<SessionInfo>> + Send;

    /// Host only: flags the session as started so it stops being offered
    /// to new players.
    fn mark_started(
        &self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Latency estimate from an envelope's age, clamped at zero.
pub(crate) fn latency_ms(message: &NetworkMessage) -> u64 {
    let age = chrono::Utc::now() - message.timestamp;
    u64::try_from(age.num_milliseconds()).unwrap_or(0)
}
