//! Messages exchanged between a peer and a relay hub.
//!
//! A relay hub is a hosted rendezvous service: it keeps the session list
//! and forwards game messages so peers never need a direct socket to each
//! other. Each WebSocket text frame carries one JSON value:
//!
//! - peer → hub: a [`RelayCall`], correlated by `call_id`
//! - hub → peer: a [`HubEvent`], either the reply to a call or a push
//!
//! Game envelopes travel as `payload` strings so the hub forwards the
//! sender's exact bytes and never needs to understand them.

use serde::{Deserialize, Serialize};

use crate::{PeerId, PeerInfo, SessionId, SessionInfo};

/// A request from a peer to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayCall {
    /// Echoed in the matching [`HubEvent::Reply`] / [`HubEvent::Failed`].
    pub call_id: u64,
    #[serde(flatten)]
    pub op: RelayOp,
}

/// What a [`RelayCall`] asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayOp {
    /// Must be the first call on a connection.
    Hello { peer_id: PeerId },
    /// Joinable sessions, newest first.
    ListSessions,
    /// Register and advertise a session hosted by the caller.
    CreateSession {
        session: SessionInfo,
        #[serde(default)]
        password: Option<String>,
    },
    /// Join by id and display name.
    JoinSession {
        session_id: SessionId,
        player_name: String,
        #[serde(default)]
        password: Option<String>,
    },
    /// Leave whatever session the caller is in.
    LeaveSession,
    /// Deliver to every other member of the caller's session.
    SendMessage { payload: String },
    /// Deliver to one named member of the caller's session.
    SendToPeer { peer_id: PeerId, payload: String },
    /// Host only: stop listing the session.
    MarkStarted,
}

/// Successful outcome of a [`RelayCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayReply {
    Ack,
    Sessions { sessions: Vec<SessionInfo> },
    Created { session: SessionInfo },
    Joined { session: SessionInfo, peers: Vec<PeerInfo> },
}

/// A frame from the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    /// A call succeeded.
    Reply { call_id: u64, reply: RelayReply },
    /// A call was refused.
    Failed { call_id: u64, reason: String },
    /// A game message from another member.
    Delivered { from: PeerId, payload: String },
    /// Someone joined the caller's session.
    PeerJoined { peer: PeerInfo },
    /// Someone left the caller's session.
    PeerLeft { peer_id: PeerId },
}
