use dicelink_protocol::{FrameError, PeerId, ProtocolError};

/// Errors that can occur in the transport layer.
///
/// Per-connection failures (a peer dropping, a corrupt frame) are not
/// reported through here: they become
/// [`TransportEvent`](crate::TransportEvent)s. These errors are for the
/// caller's own operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding a listening socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Connecting to a host or hub failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// An operation took longer than allowed.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// The operation needs an active session.
    #[error("not in a session")]
    NotInSession,

    /// One session at a time.
    #[error("already in a session")]
    AlreadyInSession,

    /// Only the session host may do this.
    #[error("only the host can do this")]
    NotHost,

    /// No link to this peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The host or hub refused the join.
    #[error("join rejected: {0}")]
    JoinRejected(String),

    /// The hub refused a call.
    #[error("relay hub refused: {0}")]
    Refused(String),

    /// A locator or argument didn't make sense.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The framed stream broke.
    #[error(transparent)]
    Frame(#[from] FrameError),
}
