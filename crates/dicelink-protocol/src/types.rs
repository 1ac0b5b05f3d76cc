//! Identity and descriptor types shared by every Dicelink peer.
//!
//! Ids are opaque strings rather than integers: peers mint their own ids
//! without a coordinator, so they must be random enough to be unique
//! across processes. A random 128-bit value rendered as lowercase hex is
//! plenty.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Maximum number of players in a session unless the host asks for fewer.
pub const DEFAULT_MAX_PLAYERS: usize = 6;

/// Returns 32 lowercase hex characters of randomness.
fn random_hex() -> String {
    let value: u128 = rand::rng().random();
    format!("{value:032x}")
}

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a peer (one participant's endpoint).
///
/// Newtype over `String` so a `PeerId` can't be confused with a
/// `SessionId` in function signatures. `#[serde(transparent)]` keeps the
/// JSON form a plain string, which also lets it be used as a map key.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh, process-unique id.
    pub fn random() -> Self {
        Self(random_hex())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight characters, used as a fallback display name.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unique identifier for a hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh session id.
    pub fn random() -> Self {
        Self(random_hex())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unique identifier for a single envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Mints a fresh message id.
    pub fn random() -> Self {
        Self(random_hex())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TransportKind / ConnectionState
// ---------------------------------------------------------------------------

/// Which transport a session is reachable through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Direct UDP discovery plus a TCP game channel on the local network.
    #[default]
    Lan,
    /// Everything goes through a hosted relay hub.
    Relay,
}

/// Connection lifecycle of a peer (or of our own link to a session).
///
/// ```text
/// Connecting → Connected → { Disconnected, Reconnecting } → Failed
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Socket accepted or dialled, join not yet confirmed.
    Connecting,
    /// Fully joined; messages flow.
    Connected,
    /// Not part of any session.
    #[default]
    Disconnected,
    /// Lost the link and trying to get it back.
    Reconnecting,
    /// Gave up.
    Failed,
}

impl ConnectionState {
    /// Returns `true` while messages may be exchanged.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PeerInfo
// ---------------------------------------------------------------------------

/// What a transport knows about one remote peer.
///
/// Created when a connection is accepted or established and dropped when
/// it disconnects or the session is left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's id.
    pub peer_id: PeerId,
    /// Player name announced in the peer's join message. Empty until then.
    #[serde(default)]
    pub player_name: String,
    /// Remote socket address or transport-specific locator.
    pub endpoint: String,
    /// Whether this peer hosts the session.
    pub is_host: bool,
    /// When we last heard anything from the peer.
    pub last_seen: DateTime<Utc>,
    /// Latest latency estimate in milliseconds.
    pub latency_ms: u64,
    /// Where the peer is in its connection lifecycle.
    pub state: ConnectionState,
}

impl PeerInfo {
    /// A freshly accepted peer: not yet named, still connecting.
    pub fn connecting(peer_id: PeerId, endpoint: impl Into<String>) -> Self {
        Self {
            peer_id,
            player_name: String::new(),
            endpoint: endpoint.into(),
            is_host: false,
            last_seen: Utc::now(),
            latency_ms: 0,
            state: ConnectionState::Connecting,
        }
    }

    /// The player name, or the short form of the id when none was given.
    pub fn display_name(&self) -> &str {
        if self.player_name.trim().is_empty() {
            self.peer_id.short()
        } else {
            &self.player_name
        }
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
// ---------------------------------------------------------------------------

/// A hosted session as advertised to would-be joiners.
///
/// The password is never serialized. Descriptors go out over broadcast
/// discovery and relay listings, so they only carry `requires_password`;
/// the host (or hub) compares the real password on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// The session's unique id.
    pub session_id: SessionId,
    /// Human-readable name shown in session lists.
    pub name: String,
    /// Peer id of the host.
    pub host_id: PeerId,
    /// Player name of the host.
    pub host_name: String,
    /// Connected players, host included.
    pub current_players: usize,
    /// Capacity, host included.
    pub max_players: usize,
    /// Set once the game has begun; started sessions accept no joins.
    pub started: bool,
    /// `host:port` for LAN sessions, the hub-side id for relay sessions.
    pub address: String,
    /// Join password. Held by the host only.
    #[serde(skip)]
    pub password: Option<String>,
    /// Whether joiners must present a password.
    #[serde(default)]
    pub requires_password: bool,
    /// How the session is reached.
    pub transport: TransportKind,
    /// When the host created the session.
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    /// Builds a descriptor for a session the local peer is about to host.
    ///
    /// Blank passwords count as no password.
    pub fn hosted(
        host_id: PeerId,
        host_name: impl Into<String>,
        name: impl Into<String>,
        max_players: usize,
        password: Option<String>,
        transport: TransportKind,
    ) -> Self {
        let password = password.filter(|p| !p.is_empty());
        Self {
            session_id: SessionId::random(),
            name: name.into(),
            host_id,
            host_name: host_name.into(),
            current_players: 1,
            max_players,
            started: false,
            address: String::new(),
            requires_password: password.is_some(),
            password,
            transport,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` when no more players fit.
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    /// Returns `true` if the session should be advertised and joined.
    pub fn is_joinable(&self) -> bool {
        !self.started && !self.is_full()
    }

    /// Checks a joiner's password against the host-held one.
    pub fn password_matches(&self, offered: Option<&str>) -> bool {
        match self.password.as_deref() {
            None => true,
            Some(expected) => offered == Some(expected),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
