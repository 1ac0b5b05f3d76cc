//! `GameNode`: one participant's transport, sync actor and event pump.
//!
//! A node is what an application holds. It hosts or joins a session
//! through its [`PeerTransport`], owns a [`SyncHandle`] for the
//! authoritative state, and runs a background pump that feeds everything
//! the transport receives into that single-writer queue.
//!
//! On the host the pump also seats peers as they connect (before the game
//! starts) and sends each newcomer a full snapshot.

use std::sync::Arc;
use std::time::Duration;

use dicelink_protocol::{
    DICE_COUNT, DiceRoll, MessageBody, NetworkMessage, PeerId, PeerInfo,
    PlayerJoined, ScoreSelection, SessionInfo, TurnChange,
};
use dicelink_sync::{
    GameMode, GameState, Rejection, ScoreCategory, Scorer, StateChanged,
    SyncConfig, SyncError, SyncHandle, SyncService, YatzyScorer, spawn_sync,
};
use dicelink_transport::{
    LanTransport, PeerTransport, RelayTransport, TransportConfig,
    TransportError, TransportEvent,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::DicelinkError;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`GameNode`].
///
/// # Example
///
/// ```rust,no_run
/// use dicelink::prelude::*;
///
/// # async fn run() -> Result<(), DicelinkError> {
/// let node = GameNodeBuilder::new()
///     .player_name("Astrid")
///     .lan(TransportConfig::default());
/// let session = node.host("Julbord", 4, None).await?;
/// # Ok(())
/// # }
/// ```
pub struct GameNodeBuilder {
    player_name: String,
    sync_config: SyncConfig,
    initial_state: GameState,
}

impl GameNodeBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            player_name: "Player".to_string(),
            sync_config: SyncConfig::default(),
            initial_state: GameState::new(),
        }
    }

    /// The name this node plays under.
    pub fn player_name(mut self, name: &str) -> Self {
        self.player_name = name.trim().to_string();
        self
    }

    pub fn sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    /// Shared session secret; enables signing and signature checks.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.sync_config.secret = Some(secret.into());
        self
    }

    /// Starts from an existing state instead of an empty table.
    pub fn initial_state(mut self, state: GameState) -> Self {
        self.initial_state = state;
        self
    }

    /// A node on the local network.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn lan(self, config: TransportConfig) -> GameNode<LanTransport> {
        self.build(LanTransport::new(config))
    }

    /// A node reaching others through the relay hub at `url`.
    pub async fn relay(
        self,
        url: &str,
        config: TransportConfig,
    ) -> Result<GameNode<RelayTransport>, DicelinkError> {
        let transport = RelayTransport::connect(url, config).await?;
        Ok(self.build(transport))
    }

    /// A node over any transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build<T: PeerTransport>(self, transport: T) -> GameNode<T> {
        let transport = Arc::new(transport);
        let events = transport.subscribe();
        let capacity = self.sync_config.queue_capacity;
        let service = Arc::new(SyncService::new(
            Arc::clone(&transport),
            self.sync_config,
        ));
        let (sync, actor) =
            spawn_sync(Arc::clone(&service), self.initial_state, capacity);
        let pump = tokio::spawn(pump(Arc::clone(&transport), sync.clone(), events));

        GameNode {
            transport,
            service,
            sync,
            player_name: self.player_name,
            tasks: vec![actor, pump],
        }
    }
}

impl Default for GameNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// GameNode
// ---------------------------------------------------------------------------

/// One participant in a Dicelink session.
pub struct GameNode<T: PeerTransport> {
    transport: Arc<T>,
    service: Arc<SyncService<T>>,
    sync: SyncHandle,
    player_name: String,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: PeerTransport> GameNode<T> {
    pub fn local_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn is_host(&self) -> bool {
        self.transport.is_host()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The queue in front of the authoritative state.
    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    /// State-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.service.subscribe()
    }

    /// Transport events, for UIs that show who is connected.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.transport.subscribe()
    }

    /// A copy of the current game state.
    pub async fn state(&self) -> Result<GameState, DicelinkError> {
        Ok(self.sync.state().await?)
    }

    // -- session lifecycle --------------------------------------------------

    /// Lists joinable sessions.
    pub async fn discover(
        &self,
        timeout: Duration,
    ) -> Result<Vec<SessionInfo>, DicelinkError> {
        Ok(self.transport.discover_sessions(timeout).await?)
    }

    /// Hosts a new session and takes the first seat.
    pub async fn host(
        &self,
        name: &str,
        max_players: usize,
        password: Option<String>,
    ) -> Result<SessionInfo, DicelinkError> {
        let session = self
            .transport
            .create_session(name, &self.player_name, max_players, password)
            .await?;
        let id = self.local_id();
        let player_name = self.player_name.clone();
        self.sync
            .update(move |state| {
                if state.player(&id).is_some() {
                    return Ok(());
                }
                state.add_player(id, &player_name)
            })
            .await?;
        Ok(session)
    }

    /// Joins a session and announces this player to the table.
    pub async fn join(
        &self,
        session: &SessionInfo,
        password: Option<String>,
    ) -> Result<(), DicelinkError> {
        self.transport
            .join_session(session, &self.player_name, password)
            .await?;
        self.sync
            .perform(MessageBody::PlayerJoined(PlayerJoined {
                player_id: self.local_id(),
                player_name: self.player_name.clone(),
            }))
            .await?;
        Ok(())
    }

    /// Leaves the current session. The local state is kept.
    pub async fn leave(&self) -> Result<(), DicelinkError> {
        Ok(self.transport.leave_session().await?)
    }

    /// Host only: starts the game with everyone seated, stops advertising
    /// the session and shares the new state.
    pub async fn start(&self, mode: GameMode) -> Result<GameState, DicelinkError> {
        if !self.is_host() {
            return Err(TransportError::NotHost.into());
        }
        let state = self.sync.update(move |state| state.start(mode)).await?;
        self.transport.mark_started().await?;
        self.sync.sync_state().await?;
        tracing::info!(
            peer_id = %self.local_id(),
            players = state.players.len(),
            mode = mode.as_str(),
            "game started"
        );
        Ok(state)
    }

    // -- actions ------------------------------------------------------------

    /// Validates, applies and broadcasts one of our own actions.
    pub async fn perform(&self, body: MessageBody) -> Result<NetworkMessage, DicelinkError> {
        Ok(self.sync.perform(body).await?)
    }

    /// Rolls every die not in `held`.
    pub async fn roll(
        &self,
        held: [bool; DICE_COUNT],
    ) -> Result<NetworkMessage, DicelinkError> {
        let state = self.state().await?;
        let values = state.dice.roll_with(held, &mut rand::rng());
        self.perform(MessageBody::DiceRoll(DiceRoll {
            player_id: self.local_id(),
            dice_values: values.to_vec(),
            held_dice: held.to_vec(),
            roll_number: state.rolls_this_turn + 1,
        }))
        .await
    }

    /// Scores the current dice in `category`.
    pub async fn score(
        &self,
        category: ScoreCategory,
    ) -> Result<NetworkMessage, DicelinkError> {
        let state = self.state().await?;
        let points = YatzyScorer.score(category, &state.dice.values());
        self.perform(MessageBody::ScoreSelection(ScoreSelection {
            player_id: self.local_id(),
            category: category.to_string(),
            score: points,
        }))
        .await
    }

    /// Host only: passes the turn to the next seat without a score, e.g.
    /// when the current player stopped responding. Scoring passes the
    /// turn on its own.
    pub async fn skip_turn(&self) -> Result<NetworkMessage, DicelinkError> {
        if !self.is_host() {
            return Err(TransportError::NotHost.into());
        }
        let state = self.state().await?;
        if !state.in_progress() {
            return Err(Rejection::NotInProgress.into());
        }
        let (Some(next_index), Some(next)) = (state.next_index(), state.next_player())
        else {
            return Err(Rejection::NotInProgress.into());
        };
        let round = if next_index == 0 { state.round + 1 } else { state.round };
        self.perform(MessageBody::TurnChange(TurnChange {
            current_player_id: next.id.clone(),
            round_number: round,
        }))
        .await
    }

    /// Leaves the session and stops the background tasks.
    pub async fn shutdown(mut self) -> Result<(), DicelinkError> {
        let left = self.transport.leave_session().await;
        let _ = self.sync.shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(left?)
    }
}

impl<T: PeerTransport> Drop for GameNode<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

/// Feeds transport events into the sync actor until either side closes.
async fn pump<T: PeerTransport>(
    transport: Arc<T>,
    sync: SyncHandle,
    mut events: broadcast::Receiver<TransportEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event pump fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let outcome = match event {
            TransportEvent::MessageReceived { message, .. } => {
                sync.apply(message).await.map(|_| ())
            }
            TransportEvent::PeerConnected(peer) if transport.is_host() => {
                welcome(&sync, peer).await
            }
            TransportEvent::PeerDisconnected(peer_id) if transport.is_host() => {
                farewell(&sync, peer_id).await
            }
            _ => Ok(()),
        };

        match outcome {
            Ok(()) => {}
            Err(SyncError::Unavailable) => break,
            Err(SyncError::Rejected(_)) => {}
            Err(e) => tracing::debug!(error = %e, "event not handled"),
        }
    }
}

/// Seats a newly connected peer (if the game hasn't started) and sends
/// it the current state.
async fn welcome(sync: &SyncHandle, peer: PeerInfo) -> Result<(), SyncError> {
    let id = peer.peer_id.clone();
    let name = peer.display_name().to_string();
    let seated = sync
        .update(move |state| {
            if state.started || state.player(&id).is_some() {
                return Ok(());
            }
            state.add_player(id, &name)
        })
        .await;
    if let Err(e) = seated {
        tracing::debug!(peer_id = %peer.peer_id, error = %e, "peer not seated");
    }
    sync.sync_state().await
}

/// Frees the seat of a peer that left before the game started.
async fn farewell(sync: &SyncHandle, peer_id: PeerId) -> Result<(), SyncError> {
    let mut removed = false;
    let state = sync.state().await?;
    if !state.started && state.player(&peer_id).is_some() {
        let id = peer_id.clone();
        sync.update(move |state| {
            state.remove_player(&id);
            Ok(())
        })
        .await?;
        removed = true;
    }
    if removed {
        tracing::info!(%peer_id, "seat freed");
        sync.sync_state().await?;
    }
    Ok(())
}
