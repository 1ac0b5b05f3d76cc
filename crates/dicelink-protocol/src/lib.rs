//! Wire protocol for Dicelink.
//!
//! This crate defines everything that crosses a socket between peers:
//!
//! - **Types** ([`PeerId`], [`SessionInfo`], [`PeerInfo`], etc.): the
//!   identities and descriptors peers exchange.
//! - **Messages** ([`NetworkMessage`], [`MessageBody`]): the tagged
//!   envelope carrying one of the ten game message kinds.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become bytes.
//! - **Framing** ([`framing`]): the 4-byte length prefix used on TCP streams.
//! - **Discovery** ([`discovery`]): the UDP request/response datagrams.
//! - **Handshake** ([`handshake`]): the first exchange on a game connection.
//! - **Relay** ([`relay`]): calls and events exchanged with a relay hub.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, sessions or game rules.
//! It only knows how messages look and how to turn them into bytes.
//!
//! ```text
//! Transport (bytes) → Protocol (NetworkMessage) → Sync (game state)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod message;
mod types;

pub mod discovery;
pub mod framing;
pub mod handshake;
pub mod relay;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{Codec, JsonCodec};
pub use error::{FrameError, ProtocolError};
pub use message::{
    Chat, DiceRoll, GameEnd, GameStart, GameStateUpdate, Heartbeat,
    MessageBody, MessageKind, NetworkMessage, PlayerJoined, PlayerLeft,
    ScoreSelection, TurnChange, DICE_COUNT,
};
pub use types::{
    ConnectionState, MessageId, PeerId, PeerInfo, SessionId, SessionInfo,
    TransportKind, DEFAULT_MAX_PLAYERS,
};
