//! The game message envelope.
//!
//! Every message on the game channel is a [`NetworkMessage`]: common
//! metadata (id, sender, timestamp, sequence, optional signature) plus a
//! [`MessageBody`] naming one of the ten message kinds.
//!
//! The body is flattened into the envelope and internally tagged, so a
//! dice roll looks like this on the wire:
//!
//! ```json
//! {
//!   "id": "5f0c…", "sender_id": "a1b2…",
//!   "timestamp": "2024-12-24T18:00:00Z", "sequence": 7,
//!   "type": "dice_roll",
//!   "player_id": "a1b2…", "dice_values": [1,2,3,4,5],
//!   "held_dice": [false,false,false,false,false], "roll_number": 1
//! }
//! ```
//!
//! The kind set is closed. Consumers `match` on [`MessageBody`], so adding
//! a kind is a compile error everywhere it has to be handled.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, PeerId};

/// Number of dice in a Yatzy hand.
pub const DICE_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// NetworkMessage
// ---------------------------------------------------------------------------

/// The top-level wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    /// Unique per message.
    pub id: MessageId,

    /// The peer that created the message (not necessarily the one that
    /// forwarded it: a host relays envelopes untouched).
    pub sender_id: PeerId,

    /// Creation time on the sender's clock.
    pub timestamp: DateTime<Utc>,

    /// Per-sender counter. Informational only: gaps are allowed and
    /// nothing relies on it for ordering.
    pub sequence: u64,

    /// Base64 HMAC of the envelope with this field absent, when the
    /// session uses authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Kind-specific payload, flattened next to the fields above.
    #[serde(flatten)]
    pub body: MessageBody,
}

impl NetworkMessage {
    /// Stamps a new message with a fresh id and the current time.
    pub fn new(sender_id: PeerId, sequence: u64, body: MessageBody) -> Self {
        Self {
            id: MessageId::random(),
            sender_id,
            timestamp: Utc::now(),
            sequence,
            signature: None,
            body,
        }
    }

    /// Shorthand for `self.body.kind()`.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// A copy with the signature removed: the form that gets signed.
    pub fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// MessageBody
// ---------------------------------------------------------------------------

/// The ten message kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    /// A player entered the session.
    PlayerJoined(PlayerJoined),
    /// A player left (or was dropped).
    PlayerLeft(PlayerLeft),
    /// Full snapshot of the authoritative game state.
    #[serde(rename = "game_state")]
    GameStateUpdate(GameStateUpdate),
    /// The current player rolled.
    DiceRoll(DiceRoll),
    /// The current player scored a category.
    ScoreSelection(ScoreSelection),
    /// The turn passed to someone else.
    TurnChange(TurnChange),
    /// The host started the game.
    GameStart(GameStart),
    /// The game is over.
    GameEnd(GameEnd),
    /// Free text.
    Chat(Chat),
    /// Keep-alive.
    Heartbeat(Heartbeat),
}

impl MessageBody {
    /// The fieldless discriminator of this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PlayerJoined(_) => MessageKind::PlayerJoined,
            Self::PlayerLeft(_) => MessageKind::PlayerLeft,
            Self::GameStateUpdate(_) => MessageKind::GameStateUpdate,
            Self::DiceRoll(_) => MessageKind::DiceRoll,
            Self::ScoreSelection(_) => MessageKind::ScoreSelection,
            Self::TurnChange(_) => MessageKind::TurnChange,
            Self::GameStart(_) => MessageKind::GameStart,
            Self::GameEnd(_) => MessageKind::GameEnd,
            Self::Chat(_) => MessageKind::Chat,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }

    /// The player a move is attributed to, for kinds that represent a
    /// player's own action.
    pub fn acting_player(&self) -> Option<&PeerId> {
        match self {
            Self::DiceRoll(m) => Some(&m.player_id),
            Self::ScoreSelection(m) => Some(&m.player_id),
            _ => None,
        }
    }
}

/// Discriminator of a [`MessageBody`], usable as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    PlayerJoined,
    PlayerLeft,
    GameStateUpdate,
    DiceRoll,
    ScoreSelection,
    TurnChange,
    GameStart,
    GameEnd,
    Chat,
    Heartbeat,
}

impl MessageKind {
    /// The wire discriminator, as it appears in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerJoined => "player_joined",
            Self::PlayerLeft => "player_left",
            Self::GameStateUpdate => "game_state",
            Self::DiceRoll => "dice_roll",
            Self::ScoreSelection => "score_selection",
            Self::TurnChange => "turn_change",
            Self::GameStart => "game_start",
            Self::GameEnd => "game_end",
            Self::Chat => "chat",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Kinds that must come from a registered player.
    pub fn is_player_action(self) -> bool {
        matches!(self, Self::DiceRoll | Self::ScoreSelection)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// A player joined. Sent once the transport-level join has succeeded;
/// passwords are checked during the handshake and never travel here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub player_id: PeerId,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub player_id: PeerId,
    #[serde(default)]
    pub reason: String,
}

/// A serialized game state. The protocol layer treats it as opaque JSON
/// text; only the sync layer knows its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateUpdate {
    pub state_json: String,
}

/// A roll of the five dice.
///
/// Counts are `Vec`s rather than arrays so a malformed roll with the
/// wrong number of dice still decodes and is rejected by validation
/// instead of vanishing as a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub player_id: PeerId,
    pub dice_values: Vec<u8>,
    pub held_dice: Vec<bool>,
    /// 1 for the first roll of a turn, up to 3.
    pub roll_number: u8,
}

/// A claim to score `score` points in `category`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSelection {
    pub player_id: PeerId,
    /// Category name, e.g. `"Ones"` or `"FullHouse"`.
    pub category: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnChange {
    pub current_player_id: PeerId,
    pub round_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStart {
    pub player_order: Vec<PeerId>,
    #[serde(default)]
    pub game_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEnd {
    pub winner_id: Option<PeerId>,
    pub final_scores: BTreeMap<PeerId, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub player_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub peers_connected: usize,
}

// =========================================================================
// Tests
// =========================================================================
