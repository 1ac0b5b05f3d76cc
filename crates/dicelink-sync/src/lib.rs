//! Authoritative game state and its synchronisation for Dicelink.
//!
//! - **Game** ([`GameState`], [`ScoreCard`], [`ScoreCategory`]): the Yatzy
//!   table the session plays on.
//! - **Scoring** ([`Scorer`], [`YatzyScorer`]): what a hand is worth.
//! - **Validation** ([`MessageValidator`]): timing, rate limits and game
//!   rules for incoming messages.
//! - **Sync** ([`SyncService`]): the pipeline that applies accepted
//!   messages and resolves conflicts (the host always wins).
//! - **Actor** ([`SyncHandle`], [`spawn_sync`]): the single-writer queue
//!   that owns the state.
//!
//! ```text
//! Transport events → SyncHandle → SyncService → GameState
//!                                     ↓
//!                              StateChanged (broadcast)
//! ```

mod actor;
mod config;
mod error;
mod game;
mod scoring;
mod service;
mod validator;

pub use actor::{StateUpdate, SyncHandle, spawn_sync};
pub use config::{SyncConfig, ValidatorConfig};
pub use error::{GameError, Rejection, SyncError};
pub use game::{
    DiceSet, Die, GameMode, GameState, MAX_ROLLS_PER_TURN, Player, ScoreCard,
    ScoreCategory, UPPER_BONUS, UPPER_BONUS_THRESHOLD, UnknownCategory,
};
pub use scoring::{Scorer, YatzyScorer};
pub use service::{StateChanged, SyncService};
pub use validator::MessageValidator;
