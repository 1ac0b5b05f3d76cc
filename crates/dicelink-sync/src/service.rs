//! The sync service: the single authority that turns accepted messages
//! into state changes.
//!
//! Incoming messages run through a fixed pipeline and the first failing
//! step wins:
//!
//! ```text
//! signature → snapshot origin → timing → rate limit → player action → kind rules → apply
//! ```
//!
//! Application happens on a copy of the state, so a message that fails
//! half-way never leaves partial writes behind. Callers that share one
//! state between several connections must serialise calls; the
//! [`SyncHandle`](crate::SyncHandle) actor does exactly that.

use std::sync::Arc;

use dicelink_protocol::{
    GameStateUpdate, MessageBody, MessageKind, NetworkMessage, PeerId,
};
use dicelink_session::{HmacAuthenticator, MessageAuthenticator};
use dicelink_transport::PeerTransport;
use tokio::sync::broadcast;

use crate::{
    GameState, MAX_ROLLS_PER_TURN, MessageValidator, Rejection, Scorer,
    SyncConfig, SyncError, YatzyScorer,
};

/// Published whenever the authoritative state changes.
#[derive(Debug, Clone)]
pub struct StateChanged {
    /// The state after the change.
    pub state: GameState,
    /// The message kind that caused it, or `None` for a local update.
    pub cause: Option<MessageKind>,
}

/// Validates and applies game messages on top of a [`PeerTransport`].
pub struct SyncService<
    T: PeerTransport,
    A: MessageAuthenticator = HmacAuthenticator,
    S: Scorer = YatzyScorer,
> {
    transport: Arc<T>,
    authenticator: A,
    validator: MessageValidator<S>,
    secret: Option<String>,
    changes: broadcast::Sender<StateChanged>,
}

impl<T: PeerTransport> SyncService<T> {
    /// A service with HMAC authentication and the standard Yatzy rules.
    pub fn new(transport: Arc<T>, config: SyncConfig) -> Self {
        Self::with_parts(transport, config, HmacAuthenticator, YatzyScorer)
    }
}

impl<T, A, S> SyncService<T, A, S>
where
    T: PeerTransport,
    A: MessageAuthenticator,
    S: Scorer,
{
    pub fn with_parts(
        transport: Arc<T>,
        config: SyncConfig,
        authenticator: A,
        scorer: S,
    ) -> Self {
        let (changes, _) =
            broadcast::channel(config.state_channel_capacity.max(1));
        Self {
            transport,
            authenticator,
            validator: MessageValidator::with_scorer(config.validator, scorer),
            secret: config.secret.filter(|s| !s.is_empty()),
            changes,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn validator(&self) -> &MessageValidator<S> {
        &self.validator
    }

    /// Whether messages are signed and signatures required.
    pub fn is_authenticated(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_host(&self) -> bool {
        self.transport.is_host()
    }

    /// A new receiver for state-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, state: &GameState, cause: Option<MessageKind>) {
        // No subscribers is fine.
        let _ = self.changes.send(StateChanged {
            state: state.clone(),
            cause,
        });
    }

    // -- outgoing -----------------------------------------------------------

    /// Wraps `body` in an envelope from us, signed when the session is
    /// authenticated.
    pub fn outgoing(&self, body: MessageBody) -> Result<NetworkMessage, SyncError> {
        let mut message = self.transport.new_message(body);
        if let Some(secret) = &self.secret {
            self.authenticator.sign_message(&mut message, secret)?;
        }
        Ok(message)
    }

    /// Sends an already built message to everyone in the session.
    pub async fn broadcast(&self, message: &NetworkMessage) -> Result<(), SyncError> {
        self.transport.send_to_all(message).await?;
        Ok(())
    }

    /// Broadcasts a full snapshot of `state`, used to bring joining or
    /// reconnecting peers up to date.
    pub async fn sync_state(&self, state: &GameState) -> Result<(), SyncError> {
        let state_json = serde_json::to_string(state)?;
        let message =
            self.outgoing(MessageBody::GameStateUpdate(GameStateUpdate { state_json }))?;
        self.broadcast(&message).await?;
        tracing::debug!(
            peer_id = %self.transport.local_peer_id(),
            players = state.players.len(),
            "state snapshot sent"
        );
        self.notify(state, Some(MessageKind::GameStateUpdate));
        Ok(())
    }

    // -- incoming -----------------------------------------------------------

    /// Runs `message` through the validation pipeline and applies it to a
    /// copy of `state`.
    ///
    /// Returns the new state. Kinds that carry no state change come back
    /// unchanged and publish nothing; every other success publishes a
    /// [`StateChanged`].
    ///
    /// # Errors
    /// The first [`Rejection`] any step produced. `state` is never touched.
    pub async fn apply_message(
        &self,
        message: &NetworkMessage,
        state: &GameState,
    ) -> Result<GameState, Rejection> {
        let host = self.transport.current_session().await.map(|s| s.host_id);
        let outcome = self
            .check(message, state, host.as_ref())
            .and_then(|()| self.validate_action(message, state))
            .and_then(|()| self.apply(message, state));

        match outcome {
            Ok(Some(next)) => {
                self.notify(&next, Some(message.kind()));
                Ok(next)
            }
            Ok(None) => Ok(state.clone()),
            Err(rejection) => {
                tracing::debug!(
                    sender = %message.sender_id,
                    kind = %message.kind(),
                    reason = %rejection,
                    "message rejected"
                );
                Err(rejection)
            }
        }
    }

    /// Whose state wins when two disagree: the host always keeps its own,
    /// everyone else always adopts the network's.
    pub fn resolve_conflict(&self, local: GameState, network: GameState) -> GameState {
        if self.is_host() { local } else { network }
    }

    /// Extra checks only the host makes before accepting a move: a roll
    /// needs rolls left this turn, a score needs a roll first and is
    /// re-checked against the scorer. Non-hosts accept.
    pub fn validate_action(
        &self,
        message: &NetworkMessage,
        state: &GameState,
    ) -> Result<(), Rejection> {
        if !self.is_host() {
            return Ok(());
        }
        match &message.body {
            MessageBody::DiceRoll(_) => {
                if state.rolls_this_turn >= MAX_ROLLS_PER_TURN {
                    return Err(Rejection::NoRollsLeft);
                }
                Ok(())
            }
            MessageBody::ScoreSelection(selection) => {
                if state.rolls_this_turn == 0 {
                    return Err(Rejection::NotRolled);
                }
                self.validator.validate_score_selection(
                    &message.sender_id,
                    selection,
                    state,
                )
            }
            _ => Ok(()),
        }
    }

    fn check(
        &self,
        message: &NetworkMessage,
        state: &GameState,
        host: Option<&PeerId>,
    ) -> Result<(), Rejection> {
        if let Some(secret) = &self.secret {
            if message.signature.is_none() {
                return Err(Rejection::Unsigned);
            }
            if !self.authenticator.verify_message(message, secret) {
                return Err(Rejection::BadSignature);
            }
        }

        let snapshot = matches!(message.body, MessageBody::GameStateUpdate(_));
        if snapshot && host != Some(&message.sender_id) {
            return Err(Rejection::SnapshotNotFromHost(message.sender_id.clone()));
        }

        self.validator.validate_timing(message)?;
        // Host snapshots follow every join and start back to back.
        if !snapshot {
            self.validator.check_rate_limit(message)?;
        }
        self.validator.validate_player_action(message, state)?;

        let sender = &message.sender_id;
        match &message.body {
            MessageBody::DiceRoll(roll) => {
                self.validator.validate_dice_roll(sender, roll, state)
            }
            MessageBody::ScoreSelection(selection) => {
                self.validator.validate_score_selection(sender, selection, state)
            }
            MessageBody::TurnChange(change) => {
                self.validator.validate_turn_change(sender, change, state, host)
            }
            MessageBody::GameStateUpdate(_)
            | MessageBody::PlayerJoined(_)
            | MessageBody::PlayerLeft(_)
            | MessageBody::GameStart(_)
            | MessageBody::GameEnd(_)
            | MessageBody::Chat(_)
            | MessageBody::Heartbeat(_) => Ok(()),
        }
    }

    /// `Ok(None)` for kinds that don't change the state.
    fn apply(
        &self,
        message: &NetworkMessage,
        state: &GameState,
    ) -> Result<Option<GameState>, Rejection> {
        match &message.body {
            MessageBody::GameStateUpdate(update) => {
                let network: GameState = serde_json::from_str(&update.state_json)
                    .map_err(|e| Rejection::Malformed(e.to_string()))?;
                network
                    .check_consistency()
                    .map_err(|e| Rejection::Malformed(e.to_string()))?;
                Ok(Some(self.resolve_conflict(state.clone(), network)))
            }
            MessageBody::DiceRoll(roll) => {
                if state.rolls_this_turn >= MAX_ROLLS_PER_TURN {
                    return Err(Rejection::NoRollsLeft);
                }
                let values = to_array(&roll.dice_values)?;
                let held = to_array(&roll.held_dice)?;
                let mut next = state.clone();
                next.dice.set(values, held);
                next.rolls_this_turn += 1;
                Ok(Some(next))
            }
            MessageBody::ScoreSelection(selection) => {
                let category = selection
                    .category
                    .parse()
                    .map_err(|_| Rejection::UnknownCategory(selection.category.clone()))?;
                let mut next = state.clone();
                let player = next
                    .player_mut(&selection.player_id)
                    .ok_or_else(|| Rejection::UnknownPlayer(selection.player_id.clone()))?;
                player
                    .score_card
                    .record(category, selection.score)
                    .map_err(|e| Rejection::Malformed(e.to_string()))?;
                next.refresh_complete();
                // Scoring ends the turn.
                if !next.complete {
                    next.advance_turn();
                }
                Ok(Some(next))
            }
            MessageBody::TurnChange(change) => {
                let index = state
                    .player_index(&change.current_player_id)
                    .ok_or_else(|| Rejection::UnknownPlayer(change.current_player_id.clone()))?;
                let mut next = state.clone();
                next.set_turn(index);
                Ok(Some(next))
            }
            MessageBody::PlayerJoined(_)
            | MessageBody::PlayerLeft(_)
            | MessageBody::GameStart(_)
            | MessageBody::GameEnd(_)
            | MessageBody::Chat(_)
            | MessageBody::Heartbeat(_) => Ok(None),
        }
    }
}

fn to_array<V: Copy, const N: usize>(values: &[V]) -> Result<[V; N], Rejection> {
    <[V; N]>::try_from(values)
        .map_err(|_| Rejection::Malformed(format!("expected {N} entries, got {}", values.len())))
}
