//! Error types for the protocol layer.
//!
//! Two enums live here because they fail in different ways. A
//! [`ProtocolError`] concerns a single payload and is recoverable: the
//! message is dropped and the stream keeps going. A [`FrameError`] means
//! the byte stream itself can no longer be trusted, so the connection
//! carrying it must be closed.

use crate::framing::MAX_FRAME_SIZE;

/// Errors that can occur while encoding or decoding a payload.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown `type` discriminator,
    /// missing fields, or a negative number where an unsigned one is
    /// expected.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The bytes decoded but break a protocol rule, e.g. a discovery
    /// datagram without the response prefix.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised while reading or writing length-prefixed frames.
///
/// Every variant is fatal for the connection it occurred on.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix was zero or above [`MAX_FRAME_SIZE`]. The body is
    /// never read in this case.
    #[error("invalid frame length {0} (must be 1..={MAX_FRAME_SIZE})")]
    InvalidLength(u32),

    /// A caller tried to send a payload that cannot be framed.
    #[error("payload of {0} bytes cannot be framed")]
    Oversized(usize),

    /// The peer closed the stream part-way through a frame.
    #[error("stream closed mid-frame")]
    Truncated,

    /// The underlying socket failed.
    #[error("frame i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
