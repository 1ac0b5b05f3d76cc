//! Relay transport: the [`PeerTransport`] contract over one WebSocket link
//! to a relay hub.
//!
//! Two tasks own the socket. The writer drains an unbounded channel of
//! outgoing frames into the sink; the reader decodes [`HubEvent`]s and
//! either completes a pending call or turns a push into a
//! [`TransportEvent`]. Calls are correlated by `call_id` through a map of
//! `oneshot` senders, the same request/reply shape a room handle uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dicelink_protocol::relay::{HubEvent, RelayCall, RelayOp, RelayReply};
use dicelink_protocol::{
    ConnectionState, MessageBody, NetworkMessage, PeerId, PeerInfo,
    PlayerLeft, ProtocolError, SessionInfo, TransportKind,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::peers::PeerTable;
use crate::{PeerTransport, TransportConfig, TransportError, TransportEvent};

type PendingCalls =
    HashMap<u64, oneshot::Sender<Result<RelayReply, String>>>;

/// A [`PeerTransport`] that reaches other players through a relay hub.
///
/// Connect with [`RelayTransport::connect`]. Dropping the transport closes
/// the hub link.
pub struct RelayTransport {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    local_id: PeerId,
    events: broadcast::Sender<TransportEvent>,
    sequence: AtomicU64,
    state: parking_lot::Mutex<ConnectionState>,
    hosting: AtomicBool,
    session: RwLock<Option<SessionInfo>>,
    /// Relay peers have no direct link, so entries carry no writer.
    peers: PeerTable,
    outbound: mpsc::UnboundedSender<Message>,
    pending: parking_lot::Mutex<PendingCalls>,
    next_call: AtomicU64,
    closed: AtomicBool,
}

impl RelayTransport {
    /// Opens a link to the hub at `url` (e.g. `ws://127.0.0.1:47780`) and
    /// introduces ourselves under a fresh peer id.
    pub async fn connect(
        url: &str,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        Self::connect_as(url, config, PeerId::random()).await
    }

    /// Like [`connect`](Self::connect) with a caller-chosen peer id.
    pub async fn connect_as(
        url: &str,
        config: TransportConfig,
        local_id: PeerId,
    ) -> Result<Self, TransportError> {
        let (ws, _) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        .map_err(|_| TransportError::Timeout("connecting to relay hub"))?
        .map_err(|e| TransportError::ConnectFailed(std::io::Error::other(e)))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            config,
            local_id,
            events,
            sequence: AtomicU64::new(0),
            state: parking_lot::Mutex::new(ConnectionState::Disconnected),
            hosting: AtomicBool::new(false),
            session: RwLock::new(None),
            peers: PeerTable::new(),
            outbound,
            pending: parking_lot::Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(error = %e, "relay hub write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        reader_inner.on_hub_event(text.as_str()).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "relay hub link failed");
                        break;
                    }
                }
            }
            reader_inner.hub_lost().await;
        });

        let transport = Self {
            inner,
            tasks: vec![writer, reader],
        };
        let timeout = transport.inner.config.request_timeout;
        transport
            .inner
            .call(
                RelayOp::Hello {
                    peer_id: transport.inner.local_id.clone(),
                },
                timeout,
            )
            .await?;
        tracing::info!(url, peer_id = %transport.inner.local_id, "connected to relay hub");
        Ok(transport)
    }

    /// Whether the hub link is still up.
    pub fn is_linked(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    async fn require_session(&self) -> Result<(), TransportError> {
        if self.inner.session.read().await.is_none() {
            return Err(TransportError::NotInSession);
        }
        Ok(())
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Hub link
// ---------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.emit(TransportEvent::ConnectionStateChanged(state));
        }
    }

    /// Sends one call and waits for its reply. A hub refusal comes back as
    /// `Err(reason)` inside the `Ok`.
    async fn call(
        &self,
        op: RelayOp,
        timeout: Duration,
    ) -> Result<RelayReply, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(
                "relay hub link is down".into(),
            ));
        }

        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed) + 1;
        let text = serde_json::to_string(&RelayCall { call_id, op })
            .map_err(ProtocolError::Encode)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        if self.outbound.send(Message::Text(text.into())).is_err() {
            self.pending.lock().remove(&call_id);
            return Err(TransportError::ConnectionClosed(
                "relay hub writer stopped".into(),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().remove(&call_id);
                Err(TransportError::Timeout("waiting for the relay hub"))
            }
            Ok(Err(_)) => Err(TransportError::ConnectionClosed(
                "relay hub link closed".into(),
            )),
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(reason))) => Err(TransportError::Refused(reason)),
        }
    }

    async fn on_hub_event(&self, text: &str) {
        let event: HubEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unreadable hub frame");
                return;
            }
        };

        match event {
            HubEvent::Reply { call_id, reply } => {
                if let Some(tx) = self.pending.lock().remove(&call_id) {
                    let _ = tx.send(Ok(reply));
                }
            }
            HubEvent::Failed { call_id, reason } => {
                if let Some(tx) = self.pending.lock().remove(&call_id) {
                    let _ = tx.send(Err(reason));
                }
            }
            HubEvent::Delivered { from, payload } => {
                let message: NetworkMessage = match serde_json::from_str(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(%from, error = %e, "dropping malformed message");
                        return;
                    }
                };
                if message.sender_id != from {
                    tracing::warn!(
                        %from,
                        claimed = %message.sender_id,
                        "dropping message with a forged sender"
                    );
                    return;
                }
                self.peers.touch(&from, &message).await;
                self.emit(TransportEvent::MessageReceived { message, from });
            }
            HubEvent::PeerJoined { peer } => {
                tracing::info!(peer_id = %peer.peer_id, name = %peer.display_name(), "peer joined");
                self.peers.insert(peer.clone(), None).await;
                self.recount().await;
                self.emit(TransportEvent::PeerConnected(peer));
            }
            HubEvent::PeerLeft { peer_id } => {
                if self.peers.remove(&peer_id).await.is_none() {
                    return;
                }
                tracing::info!(%peer_id, "peer left");
                self.emit(TransportEvent::PeerDisconnected(peer_id.clone()));

                let host_left = self
                    .session
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|s| s.host_id == peer_id);
                if host_left && !self.hosting.load(Ordering::Acquire) {
                    self.peers.clear().await;
                    *self.session.write().await = None;
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    self.recount().await;
                }
            }
        }
    }

    async fn recount(&self) {
        let count = self.peers.connected_count().await + 1;
        if let Some(session) = self.session.write().await.as_mut() {
            session.current_players = count;
        }
    }

    /// The reader stopped: every pending call fails and the session is
    /// gone.
    async fn hub_lost(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
        self.peers.clear().await;
        *self.session.write().await = None;
        self.hosting.store(false, Ordering::Release);
        self.set_state(ConnectionState::Failed);
        tracing::warn!("relay hub link lost");
    }

    fn payload(message: &NetworkMessage) -> Result<String, TransportError> {
        Ok(serde_json::to_string(message).map_err(ProtocolError::Encode)?)
    }
}

// ---------------------------------------------------------------------------
// PeerTransport
// ---------------------------------------------------------------------------

impl PeerTransport for RelayTransport {
    fn local_peer_id(&self) -> PeerId {
        self.inner.local_id.clone()
    }

    fn is_host(&self) -> bool {
        self.inner.hosting.load(Ordering::Acquire)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    fn new_message(&self, body: MessageBody) -> NetworkMessage {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        NetworkMessage::new(self.inner.local_id.clone(), sequence, body)
    }

    async fn discover_sessions(
        &self,
        timeout: Duration,
    ) -> Result<Vec<SessionInfo>, TransportError> {
        match self.inner.call(RelayOp::ListSessions, timeout).await? {
            RelayReply::Sessions { sessions } => {
                tracing::info!(count = sessions.len(), "discovery finished");
                Ok(sessions)
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn create_session(
        &self,
        name: &str,
        player_name: &str,
        max_players: usize,
        password: Option<String>,
    ) -> Result<SessionInfo, TransportError> {
        if max_players == 0 {
            return Err(TransportError::InvalidArgument(
                "max_players must be at least 1".into(),
            ));
        }
        if self.inner.session.read().await.is_some() {
            return Err(TransportError::AlreadyInSession);
        }

        let draft = SessionInfo::hosted(
            self.inner.local_id.clone(),
            player_name,
            name,
            max_players,
            password.clone(),
            TransportKind::Relay,
        );
        let op = RelayOp::CreateSession {
            session: draft,
            password: password.filter(|p| !p.is_empty()),
        };
        let session = match self
            .inner
            .call(op, self.inner.config.request_timeout)
            .await?
        {
            RelayReply::Created { session } => session,
            other => return Err(unexpected(&other)),
        };

        *self.inner.session.write().await = Some(session.clone());
        self.inner.hosting.store(true, Ordering::Release);
        self.inner.set_state(ConnectionState::Connected);
        tracing::info!(session_id = %session.session_id, name = %session.name, "hosting session via relay");
        Ok(session)
    }

    async fn join_session(
        &self,
        session: &SessionInfo,
        player_name: &str,
        password: Option<String>,
    ) -> Result<(), TransportError> {
        if self.inner.session.read().await.is_some() {
            return Err(TransportError::AlreadyInSession);
        }

        self.inner.set_state(ConnectionState::Connecting);
        let op = RelayOp::JoinSession {
            session_id: session.session_id.clone(),
            player_name: player_name.to_string(),
            password,
        };
        let reply = match self.inner.call(op, self.inner.config.request_timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                self.inner.set_state(ConnectionState::Failed);
                return Err(match e {
                    TransportError::Refused(reason) => {
                        TransportError::JoinRejected(reason)
                    }
                    other => other,
                });
            }
        };
        let RelayReply::Joined { session, peers } = reply else {
            self.inner.set_state(ConnectionState::Failed);
            return Err(unexpected(&reply));
        };

        for peer in &peers {
            self.inner.peers.insert(peer.clone(), None).await;
        }
        tracing::info!(session_id = %session.session_id, peers = peers.len(), "joined session via relay");
        *self.inner.session.write().await = Some(session);
        self.inner.set_state(ConnectionState::Connected);
        for peer in peers {
            self.inner.emit(TransportEvent::PeerConnected(peer));
        }
        Ok(())
    }

    async fn leave_session(&self) -> Result<(), TransportError> {
        if self.inner.session.read().await.is_none() {
            return Ok(());
        }

        let goodbye = self.new_message(MessageBody::PlayerLeft(PlayerLeft {
            player_id: self.inner.local_id.clone(),
            reason: "left the session".into(),
        }));
        if let Err(e) = self.send_to_all(&goodbye).await {
            tracing::debug!(error = %e, "leave notification not sent");
        }
        if let Err(e) = self
            .inner
            .call(RelayOp::LeaveSession, self.inner.config.request_timeout)
            .await
        {
            tracing::debug!(error = %e, "hub did not acknowledge leave");
        }

        self.inner.peers.clear().await;
        *self.inner.session.write().await = None;
        self.inner.hosting.store(false, Ordering::Release);
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("left session");
        Ok(())
    }

    async fn send_to_all(
        &self,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        self.require_session().await?;
        let payload = Inner::payload(message)?;
        self.inner
            .call(
                RelayOp::SendMessage { payload },
                self.inner.config.request_timeout,
            )
            .await?;
        Ok(())
    }

    async fn send_to(
        &self,
        peer_id: &PeerId,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        self.require_session().await?;
        if !self.inner.peers.contains(peer_id).await {
            return Err(TransportError::UnknownPeer(peer_id.clone()));
        }
        let payload = Inner::payload(message)?;
        self.inner
            .call(
                RelayOp::SendToPeer {
                    peer_id: peer_id.clone(),
                    payload,
                },
                self.inner.config.request_timeout,
            )
            .await?;
        Ok(())
    }

    async fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.connected().await
    }

    async fn current_session(&self) -> Option<SessionInfo> {
        self.inner.session.read().await.clone()
    }

    async fn mark_started(&self) -> Result<(), TransportError> {
        if !self.is_host() {
            return Err(TransportError::NotHost);
        }
        self.require_session().await?;
        self.inner
            .call(RelayOp::MarkStarted, self.inner.config.request_timeout)
            .await?;
        if let Some(session) = self.inner.session.write().await.as_mut() {
            session.started = true;
        }
        Ok(())
    }
}

fn unexpected(reply: &RelayReply) -> TransportError {
    TransportError::InvalidArgument(format!("unexpected hub reply {reply:?}"))
}
