//! Codec trait and the JSON implementation used on the wire.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! Transports hold a codec instead of calling `serde_json` directly, so the
//! envelope format is decided in exactly one place.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec is shared by every
/// connection task a transport spawns.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that produces UTF-8 JSON via `serde_json`.
///
/// Every frame on the game channel and every relay payload is JSON, which
/// keeps the protocol inspectable with nothing more than a packet capture.
///
/// ## Example
///
/// ```rust
/// use dicelink_protocol::{
///     Codec, Heartbeat, JsonCodec, MessageBody, NetworkMessage, PeerId,
/// };
///
/// let codec = JsonCodec;
/// let msg = NetworkMessage::new(
///     PeerId::new("host"),
///     1,
///     MessageBody::Heartbeat(Heartbeat { peers_connected: 2 }),
/// );
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: NetworkMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
