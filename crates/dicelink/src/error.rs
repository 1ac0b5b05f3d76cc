//! Unified error type for Dicelink.

use dicelink_protocol::ProtocolError;
use dicelink_relay::RelayError;
use dicelink_session::SessionError;
use dicelink_sync::{GameError, Rejection, SyncError};
use dicelink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DicelinkError {
    /// Sockets, sessions and peers.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding and decoding.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Signing and the session registry.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Validation and state sync.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Running a relay hub.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<Rejection> for DicelinkError {
    fn from(rejection: Rejection) -> Self {
        Self::Sync(SyncError::Rejected(rejection))
    }
}

impl From<GameError> for DicelinkError {
    fn from(error: GameError) -> Self {
        Self::Sync(SyncError::Game(error))
    }
}

impl DicelinkError {
    /// The rejection, if this error is a refused message.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Sync(SyncError::Rejected(r)) => Some(r),
            _ => None,
        }
    }
}
