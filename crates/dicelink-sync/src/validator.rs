//! Stateless legality checks for incoming messages.
//!
//! Every check is a predicate over the message, the current game state
//! and (for rate limiting) the sender's recent history. None of them
//! touch the game state; the [`SyncService`](crate::SyncService) decides
//! what runs in which order and applies the message afterwards.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dicelink_protocol::{
    DICE_COUNT, DiceRoll, MessageKind, NetworkMessage, PeerId,
    ScoreSelection, TurnChange,
};
use parking_lot::Mutex;

use crate::{
    GameState, Rejection, ScoreCategory, Scorer, ValidatorConfig,
    YatzyScorer,
};

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

type RateKey = (PeerId, MessageKind);

/// Sliding-window history per (sender, kind).
#[derive(Debug, Default)]
struct RateLimiter {
    history: Mutex<HashMap<RateKey, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Checks one message against the window and records it when it
    /// passes. A refused message leaves no trace in the history.
    fn check(
        &self,
        sender: &PeerId,
        kind: MessageKind,
        now: Instant,
        config: &ValidatorConfig,
    ) -> Result<(), Rejection> {
        let mut history = self.history.lock();
        let entries = history.entry((sender.clone(), kind)).or_default();

        while let Some(&oldest) = entries.front() {
            if now.saturating_duration_since(oldest) >= config.rate_window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= config.max_messages_per_window {
            return Err(Rejection::RateLimited {
                sender: sender.clone(),
                kind,
            });
        }
        if let Some(&last) = entries.back() {
            if now.saturating_duration_since(last)
                < config.min_message_interval
            {
                return Err(Rejection::TooFrequent {
                    sender: sender.clone(),
                    kind,
                });
            }
        }

        entries.push_back(now);
        Ok(())
    }

    /// Drops entries older than the window and keys left empty.
    fn prune(&self, now: Instant, window: Duration) -> usize {
        let mut history = self.history.lock();
        history.retain(|_, entries| {
            entries.retain(|&at| now.saturating_duration_since(at) < window);
            !entries.is_empty()
        });
        history.len()
    }
}

// ---------------------------------------------------------------------------
// MessageValidator
// ---------------------------------------------------------------------------

/// Accepts or rejects messages against the authoritative state.
///
/// Generic over the [`Scorer`] so score claims are checked against the
/// same rules the game uses.
#[derive(Debug)]
pub struct MessageValidator<S: Scorer = YatzyScorer> {
    config: ValidatorConfig,
    scorer: S,
    rate: RateLimiter,
}

impl MessageValidator<YatzyScorer> {
    pub fn new(config: ValidatorConfig) -> Self {
        Self::with_scorer(config, YatzyScorer)
    }
}

impl Default for MessageValidator<YatzyScorer> {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl<S: Scorer> MessageValidator<S> {
    pub fn with_scorer(config: ValidatorConfig, scorer: S) -> Self {
        Self {
            config,
            scorer,
            rate: RateLimiter::default(),
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    // -- timing -------------------------------------------------------------

    /// Refuses replays and messages from too far in the future.
    pub fn validate_timing(
        &self,
        message: &NetworkMessage,
    ) -> Result<(), Rejection> {
        self.validate_timing_at(message, Utc::now())
    }

    /// [`validate_timing`](Self::validate_timing) against an explicit
    /// clock reading.
    pub fn validate_timing_at(
        &self,
        message: &NetworkMessage,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let age = now - message.timestamp;
        match age.to_std() {
            Ok(age) if age > self.config.max_message_age => {
                Err(Rejection::Stale { age })
            }
            Ok(_) => Ok(()),
            Err(_) => {
                // Negative age: dated ahead of our clock.
                let ahead = (-age).to_std().unwrap_or(Duration::MAX);
                if ahead > self.config.clock_skew_tolerance {
                    Err(Rejection::FutureDated { ahead })
                } else {
                    Ok(())
                }
            }
        }
    }

    // -- rate limiting ------------------------------------------------------

    /// Checks the sender's recent history for this message kind and
    /// records the message if it is allowed through.
    pub fn check_rate_limit(
        &self,
        message: &NetworkMessage,
    ) -> Result<(), Rejection> {
        self.check_rate_limit_at(message, Instant::now())
    }

    pub fn check_rate_limit_at(
        &self,
        message: &NetworkMessage,
        now: Instant,
    ) -> Result<(), Rejection> {
        self.rate
            .check(&message.sender_id, message.kind(), now, &self.config)
    }

    /// Forgets history older than the rate window. Returns how many
    /// (sender, kind) keys are still tracked.
    pub fn prune_stale(&self) -> usize {
        self.prune_stale_at(Instant::now())
    }

    pub fn prune_stale_at(&self, now: Instant) -> usize {
        self.rate.prune(now, self.config.rate_window)
    }

    // -- game rules ---------------------------------------------------------

    /// Turn actions need a game in progress; player actions need the
    /// sender to be seated.
    pub fn validate_player_action(
        &self,
        message: &NetworkMessage,
        state: &GameState,
    ) -> Result<(), Rejection> {
        let kind = message.kind();
        let turn_action = kind.is_player_action()
            || kind == MessageKind::TurnChange;
        if turn_action && !state.in_progress() {
            return Err(Rejection::NotInProgress);
        }
        if kind.is_player_action() && state.player(&message.sender_id).is_none()
        {
            return Err(Rejection::UnknownPlayer(message.sender_id.clone()));
        }
        Ok(())
    }

    pub fn validate_dice_roll(
        &self,
        sender: &PeerId,
        roll: &DiceRoll,
        state: &GameState,
    ) -> Result<(), Rejection> {
        check_acting_player(sender, &roll.player_id, state)?;

        if !(1..=3).contains(&roll.roll_number) {
            return Err(Rejection::InvalidRollNumber(roll.roll_number));
        }
        if roll.dice_values.len() != DICE_COUNT {
            return Err(Rejection::WrongDiceCount(roll.dice_values.len()));
        }
        if let Some(&bad) =
            roll.dice_values.iter().find(|v| !(1..=6).contains(*v))
        {
            return Err(Rejection::DieOutOfRange(bad));
        }
        if roll.held_dice.len() != DICE_COUNT {
            return Err(Rejection::WrongHeldCount(roll.held_dice.len()));
        }

        if roll.roll_number > 1 {
            let current = state.dice.values();
            for (index, (&held, &value)) in
                roll.held_dice.iter().zip(&roll.dice_values).enumerate()
            {
                if held && value != current[index] {
                    return Err(Rejection::HeldDieChanged { index });
                }
            }
        }
        Ok(())
    }

    pub fn validate_score_selection(
        &self,
        sender: &PeerId,
        selection: &ScoreSelection,
        state: &GameState,
    ) -> Result<(), Rejection> {
        check_acting_player(sender, &selection.player_id, state)?;

        let category: ScoreCategory = selection
            .category
            .parse()
            .map_err(|_| Rejection::UnknownCategory(selection.category.clone()))?;

        let player = state
            .player(&selection.player_id)
            .ok_or_else(|| Rejection::UnknownPlayer(selection.player_id.clone()))?;
        if player.score_card.is_scored(category) {
            return Err(Rejection::CategoryTaken(category));
        }

        let expected = self.scorer.score(category, &state.dice.values());
        if selection.score != expected {
            return Err(Rejection::ScoreMismatch {
                category,
                claimed: selection.score,
                expected,
            });
        }
        Ok(())
    }

    /// Scoring already passes the turn; an explicit change is the host
    /// skipping ahead, and only ever to the next seat.
    pub fn validate_turn_change(
        &self,
        sender: &PeerId,
        change: &TurnChange,
        state: &GameState,
        host: Option<&PeerId>,
    ) -> Result<(), Rejection> {
        if state.player(&change.current_player_id).is_none() {
            return Err(Rejection::UnknownPlayer(
                change.current_player_id.clone(),
            ));
        }
        if host != Some(sender) {
            return Err(Rejection::TurnNotYours(sender.clone()));
        }
        match state.next_player() {
            Some(next) if next.id == change.current_player_id => Ok(()),
            Some(next) => Err(Rejection::WrongNextPlayer {
                expected: next.id.clone(),
                got: change.current_player_id.clone(),
            }),
            None => Err(Rejection::NotInProgress),
        }
    }
}

/// The sender acts for itself, and it is its turn.
fn check_acting_player(
    sender: &PeerId,
    player: &PeerId,
    state: &GameState,
) -> Result<(), Rejection> {
    if sender != player {
        return Err(Rejection::Impersonation {
            sender: sender.clone(),
            player: player.clone(),
        });
    }
    if !state.is_current_player(player) {
        return Err(Rejection::NotYourTurn(player.clone()));
    }
    Ok(())
}
