//! Error types for the session layer.

use dicelink_protocol::{PeerId, SessionId};

/// Errors from signing or from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Signing needs a non-empty secret.
    #[error("session secret is empty")]
    EmptySecret,

    /// The secret could not be used as an HMAC key.
    #[error("invalid HMAC key")]
    InvalidKey,

    /// The message could not be serialized for signing.
    #[error("cannot serialize message for signing: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No session with this id is registered.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session has no free seat.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    /// The session already started and takes no more players.
    #[error("session {0} has already started")]
    AlreadyStarted(SessionId),

    /// The offered password does not match.
    #[error("wrong password for session {0}")]
    WrongPassword(SessionId),

    /// A peer can only be in one session at a time.
    #[error("peer {0} is already in a session")]
    AlreadyInSession(PeerId),

    /// The peer is not in any session.
    #[error("peer {0} is not in a session")]
    NotInSession(PeerId),

    /// Only the host may do this.
    #[error("peer {0} is not the session host")]
    NotHost(PeerId),
}
