//! The single-writer queue in front of the sync service.
//!
//! One task owns the authoritative [`GameState`]; everything else talks
//! to it through a cloneable [`SyncHandle`]. Messages from many
//! connections are therefore applied strictly one at a time, in the order
//! they reach the queue.

use std::sync::Arc;
use std::time::Duration;

use dicelink_protocol::{MessageBody, NetworkMessage};
use dicelink_session::MessageAuthenticator;
use dicelink_transport::{PeerTransport, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{GameError, GameState, Rejection, Scorer, SyncError, SyncService};

/// A local change to the state, run inside the actor.
pub type StateUpdate =
    Box<dyn FnOnce(&mut GameState) -> Result<(), GameError> + Send>;

enum SyncCommand {
    /// Validate and apply a message that arrived from the network.
    Apply {
        message: NetworkMessage,
        reply: oneshot::Sender<Result<GameState, Rejection>>,
    },

    /// Build, apply and broadcast one of our own actions.
    Perform {
        body: MessageBody,
        reply: oneshot::Sender<Result<NetworkMessage, SyncError>>,
    },

    /// Broadcast a snapshot of the current state.
    SyncState {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },

    /// Change the state directly (seat players, start the game).
    Update {
        change: StateUpdate,
        reply: oneshot::Sender<Result<GameState, GameError>>,
    },

    GetState {
        reply: oneshot::Sender<GameState>,
    },

    Shutdown,
}

/// Handle to a running sync actor. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Queues a received message for validation and application.
    pub async fn apply(
        &self,
        message: NetworkMessage,
    ) -> Result<GameState, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.request(SyncCommand::Apply { message, reply }, rx)
            .await?
            .map_err(SyncError::from)
    }

    /// Applies one of our own actions through the same pipeline as a
    /// remote one, then broadcasts it. Returns the sent envelope.
    pub async fn perform(
        &self,
        body: MessageBody,
    ) -> Result<NetworkMessage, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.request(SyncCommand::Perform { body, reply }, rx).await?
    }

    /// Broadcasts the current state to every peer.
    pub async fn sync_state(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.request(SyncCommand::SyncState { reply }, rx).await?
    }

    /// Runs `change` against the state and keeps the result if it
    /// succeeds. Nothing is sent; follow up with
    /// [`sync_state`](Self::sync_state) to share the change.
    pub async fn update<F>(&self, change: F) -> Result<GameState, SyncError>
    where
        F: FnOnce(&mut GameState) -> Result<(), GameError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let change = Box::new(change);
        self.request(SyncCommand::Update { change, reply }, rx)
            .await?
            .map_err(SyncError::from)
    }

    /// A copy of the current state.
    pub async fn state(&self) -> Result<GameState, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.request(SyncCommand::GetState { reply }, rx).await
    }

    /// Stops the actor. Queued commands ahead of this one still run.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.sender
            .send(SyncCommand::Shutdown)
            .await
            .map_err(|_| SyncError::Unavailable)
    }

    async fn request<R>(
        &self,
        command: SyncCommand,
        rx: oneshot::Receiver<R>,
    ) -> Result<R, SyncError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SyncError::Unavailable)?;
        rx.await.map_err(|_| SyncError::Unavailable)
    }
}

struct SyncActor<T, A, S>
where
    T: PeerTransport,
    A: MessageAuthenticator,
    S: Scorer,
{
    service: Arc<SyncService<T, A, S>>,
    state: GameState,
    receiver: mpsc::Receiver<SyncCommand>,
}

impl<T, A, S> SyncActor<T, A, S>
where
    T: PeerTransport,
    A: MessageAuthenticator,
    S: Scorer,
{
    async fn run(mut self) {
        let peer_id = self.service.transport().local_peer_id();
        tracing::info!(%peer_id, "sync actor started");

        let every = self.service.validator().config().prune_interval;
        let mut prune = tokio::time::interval(every.max(Duration::from_millis(1)));
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        SyncCommand::Apply { message, reply } => {
                            let result = self.handle_apply(&message).await;
                            let _ = reply.send(result);
                        }
                        SyncCommand::Perform { body, reply } => {
                            let result = self.handle_perform(body).await;
                            let _ = reply.send(result);
                        }
                        SyncCommand::SyncState { reply } => {
                            let result = self.service.sync_state(&self.state).await;
                            let _ = reply.send(result);
                        }
                        SyncCommand::Update { change, reply } => {
                            let result = self.handle_update(change);
                            let _ = reply.send(result);
                        }
                        SyncCommand::GetState { reply } => {
                            let _ = reply.send(self.state.clone());
                        }
                        SyncCommand::Shutdown => break,
                    }
                }
                _ = prune.tick() => {
                    let tracked = self.service.validator().prune_stale();
                    tracing::trace!(%peer_id, tracked, "rate history pruned");
                }
            }
        }

        tracing::info!(%peer_id, "sync actor stopped");
    }

    async fn handle_apply(
        &mut self,
        message: &NetworkMessage,
    ) -> Result<GameState, Rejection> {
        let next = self.service.apply_message(message, &self.state).await?;
        self.state = next;
        Ok(self.state.clone())
    }

    async fn handle_perform(
        &mut self,
        body: MessageBody,
    ) -> Result<NetworkMessage, SyncError> {
        let message = self.service.outgoing(body)?;
        self.state = self.service.apply_message(&message, &self.state).await?;

        match self.service.broadcast(&message).await {
            Ok(()) => Ok(message),
            // Local play without a session.
            Err(SyncError::Transport(TransportError::NotInSession)) => {
                Ok(message)
            }
            Err(e) => Err(e),
        }
    }

    fn handle_update(
        &mut self,
        change: StateUpdate,
    ) -> Result<GameState, GameError> {
        let mut next = self.state.clone();
        change(&mut next)?;
        self.state = next;
        self.service.notify(&self.state, None);
        Ok(self.state.clone())
    }
}

/// Spawns the actor owning `state` and returns a handle to it.
///
/// The actor stops when [`SyncHandle::shutdown`] is called or every
/// handle has been dropped.
pub fn spawn_sync<T, A, S>(
    service: Arc<SyncService<T, A, S>>,
    state: GameState,
    capacity: usize,
) -> (SyncHandle, JoinHandle<()>)
where
    T: PeerTransport,
    A: MessageAuthenticator,
    S: Scorer,
{
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let actor = SyncActor {
        service,
        state,
        receiver,
    };
    let task = tokio::spawn(actor.run());
    (SyncHandle { sender }, task)
}
