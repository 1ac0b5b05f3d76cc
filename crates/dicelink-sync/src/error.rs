//! Error types for the sync layer.

use std::time::Duration;

use dicelink_protocol::{MessageKind, PeerId};
use dicelink_session::SessionError;
use dicelink_transport::TransportError;

use crate::ScoreCategory;

/// Why an incoming message was not applied.
///
/// Rejections are ordinary values: they're logged, returned to local
/// callers and tested against, but never sent back to the offending
/// peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The session is authenticated and the message carries no signature.
    #[error("message is not signed")]
    Unsigned,

    /// The signature does not match the message.
    #[error("bad signature")]
    BadSignature,

    /// Older than the allowed message age.
    #[error("message is stale ({age:?} old)")]
    Stale { age: Duration },

    /// Dated further in the future than clock skew explains.
    #[error("message is dated {ahead:?} in the future")]
    FutureDated { ahead: Duration },

    /// Too many messages of this kind in the rate window.
    #[error("rate limit exceeded for {kind} from {sender}")]
    RateLimited { sender: PeerId, kind: MessageKind },

    /// Sent too soon after the previous one of the same kind.
    #[error("{kind} from {sender} arrived too soon after the last one")]
    TooFrequent { sender: PeerId, kind: MessageKind },

    /// Game actions need a started, unfinished game.
    #[error("game is not in progress")]
    NotInProgress,

    /// The peer does not play in this game.
    #[error("{0} is not a player in this game")]
    UnknownPlayer(PeerId),

    /// Someone acted out of turn.
    #[error("it is not {0}'s turn")]
    NotYourTurn(PeerId),

    /// A player may only act for themselves.
    #[error("{sender} sent an action for {player}")]
    Impersonation { sender: PeerId, player: PeerId },

    #[error("roll number {0} is outside 1..=3")]
    InvalidRollNumber(u8),

    #[error("expected 5 dice, got {0}")]
    WrongDiceCount(usize),

    #[error("die value {0} is outside 1..=6")]
    DieOutOfRange(u8),

    #[error("expected 5 held flags, got {0}")]
    WrongHeldCount(usize),

    /// A held die came back with a different face.
    #[error("held die {index} changed value")]
    HeldDieChanged { index: usize },

    /// All rolls of the turn are used up.
    #[error("no rolls left this turn")]
    NoRollsLeft,

    /// Scoring before the first roll of the turn.
    #[error("must roll before scoring")]
    NotRolled,

    #[error("unknown score category {0:?}")]
    UnknownCategory(String),

    #[error("category {0} is already scored")]
    CategoryTaken(ScoreCategory),

    /// The claimed score is not what the dice are worth.
    #[error("{category} is worth {expected}, not {claimed}")]
    ScoreMismatch {
        category: ScoreCategory,
        claimed: u32,
        expected: u32,
    },

    /// Only the host hands over the turn outside of scoring.
    #[error("{0} may not change the turn")]
    TurnNotYours(PeerId),

    /// The turn may only pass to the next seat.
    #[error("turn must pass to {expected}, not {got}")]
    WrongNextPlayer { expected: PeerId, got: PeerId },

    /// Full-state snapshots are only taken from the session host.
    #[error("snapshot from {0}, who is not the host")]
    SnapshotNotFromHost(PeerId),

    /// A snapshot that could not be decoded, or any other failure while
    /// applying an otherwise valid message.
    #[error("cannot apply message: {0}")]
    Malformed(String),
}

/// Rule violations in direct [`GameState`](crate::GameState) calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("the game has already started")]
    AlreadyStarted,

    #[error("player names cannot be blank")]
    BlankName,

    #[error("player {0} is already seated")]
    DuplicatePlayer(PeerId),

    #[error("the name {0:?} is taken")]
    DuplicateName(String),

    /// A state that breaks its own invariants, e.g. from a snapshot.
    #[error("inconsistent game state: {0}")]
    Inconsistent(&'static str),

    #[error("need {needed} players to start, have {seated}")]
    NotEnoughPlayers { needed: usize, seated: usize },

    #[error("category {0} is already scored")]
    CategoryTaken(ScoreCategory),
}

/// Errors from sync operations that go beyond judging one message.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The message was judged and refused.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// A local state change broke the game rules.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Sending failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Signing failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The state could not be serialized for a snapshot.
    #[error("cannot serialize game state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sync actor has stopped.
    #[error("sync service is unavailable")]
    Unavailable,
}
