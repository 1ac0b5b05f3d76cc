//! LAN transport: UDP discovery plus a framed TCP game channel.
//!
//! The host runs three kinds of background task, all stopped by one
//! shared `watch` signal when the session is left:
//!
//! - an accept loop on the game port,
//! - a discovery responder on the discovery port,
//! - one link task per joined peer, reading frames in arrival order.
//!
//! A joiner runs a single link task for its connection to the host.
//! Every link also has a writer task (see [`crate::peers`]) so that
//! relaying to many peers never waits on a slow socket.
//!
//! The host relays: whatever arrives on one link is re-framed and queued
//! for every other link, byte for byte, after being reported locally.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dicelink_protocol::discovery::{self, DISCOVERY_REQUEST, MAX_DATAGRAM_SIZE};
use dicelink_protocol::framing::{encode_frame, read_frame, write_frame};
use dicelink_protocol::handshake::{JoinRequest, JoinResponse};
use dicelink_protocol::{
    Codec, ConnectionState, JsonCodec, MessageBody, NetworkMessage, PeerId,
    PeerInfo, PlayerLeft, SessionInfo, TransportKind,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;

use crate::peers::{Fanout, PeerTable, Queued, connected_peer, spawn_writer};
use crate::{PeerTransport, TransportConfig, TransportError, TransportEvent};

/// Direct-socket [`PeerTransport`] for players on the same network.
///
/// Not `Clone`: share it behind an `Arc`. Dropping it stops every
/// background task it started.
pub struct LanTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    local_id: PeerId,
    codec: JsonCodec,
    events: broadcast::Sender<TransportEvent>,
    sequence: AtomicU64,
    state: parking_lot::Mutex<ConnectionState>,
    hosting: AtomicBool,
    peers: PeerTable,
    /// Also serves as the admission lock: joins are checked and
    /// registered while holding its write guard.
    session: RwLock<Option<SessionInfo>>,
    tasks: parking_lot::Mutex<Option<SessionTasks>>,
}

/// Background work belonging to the current session.
struct SessionTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    game_addr: Option<SocketAddr>,
    discovery_addr: Option<SocketAddr>,
}

impl LanTransport {
    /// Creates an idle transport with a fresh peer id.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_peer_id(config, PeerId::random())
    }

    /// Creates an idle transport with a caller-chosen peer id.
    pub fn with_peer_id(config: TransportConfig, local_id: PeerId) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                local_id,
                codec: JsonCodec,
                events,
                sequence: AtomicU64::new(0),
                state: parking_lot::Mutex::new(ConnectionState::Disconnected),
                hosting: AtomicBool::new(false),
                peers: PeerTable::new(),
                session: RwLock::new(None),
                tasks: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Address the game listener is bound to while hosting.
    pub fn game_addr(&self) -> Option<SocketAddr> {
        self.inner.tasks.lock().as_ref().and_then(|t| t.game_addr)
    }

    /// Address the discovery responder is bound to while hosting.
    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.inner.tasks.lock().as_ref().and_then(|t| t.discovery_addr)
    }

    /// Dials the host and performs the join handshake.
    async fn handshake(
        &self,
        addr: SocketAddr,
        player_name: &str,
        password: Option<String>,
    ) -> Result<(OwnedReadHalf, OwnedWriteHalf, SessionInfo, PeerInfo), TransportError>
    {
        let inner = &self.inner;
        let stream = tokio::time::timeout(
            inner.config.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| TransportError::Timeout("connecting to host"))?
        .map_err(TransportError::ConnectFailed)?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let request = JoinRequest {
            peer_id: inner.local_id.clone(),
            player_name: player_name.to_string(),
            password,
        };
        write_frame(&mut writer, &inner.codec.encode(&request)?).await?;

        let reply = tokio::time::timeout(
            inner.config.request_timeout,
            read_frame(&mut reader),
        )
        .await
        .map_err(|_| TransportError::Timeout("waiting for join reply"))??
        .ok_or_else(|| {
            TransportError::ConnectionClosed("host closed during join".into())
        })?;

        match inner.codec.decode::<JoinResponse>(&reply)? {
            JoinResponse::Accepted { session, host } => {
                Ok((reader, writer, session, host))
            }
            JoinResponse::Rejected { reason } => {
                Err(TransportError::JoinRejected(reason))
            }
        }
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        for handle in self.inner.stop_tasks() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state helpers
// ---------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine.
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

    fn is_hosting(&self) -> bool {
        self.hosting.load(Ordering::Acquire)
    }

    /// Registers a task with the current session, or cancels it if the
    /// session is already gone.
    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        match tasks.as_mut() {
            Some(tasks) => tasks.handles.push(handle),
            None => handle.abort(),
        }
    }

    /// Signals every background task to stop and hands back their
    /// handles.
    fn stop_tasks(&self) -> Vec<JoinHandle<()>> {
        match self.tasks.lock().take() {
            Some(tasks) => {
                let _ = tasks.shutdown.send(true);
                tasks.handles
            }
            None => Vec::new(),
        }
    }

    async fn reset(&self) {
        self.peers.clear().await;
        *self.session.write().await = None;
        self.hosting.store(false, Ordering::Release);
    }

    fn frame(&self, message: &NetworkMessage) -> Result<Arc<[u8]>, TransportError> {
        let payload = self.codec.encode(message)?;
        Ok(Arc::from(encode_frame(&payload)?))
    }

    /// One frame from `from`: report it, then relay it if we host.
    ///
    /// A joiner's only link is to the host, which relays for everyone, so
    /// only the host can tie a sender id to the link it came in on.
    async fn on_frame(&self, from: &PeerId, payload: Vec<u8>) {
        let message: NetworkMessage = match self.codec.decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping malformed message");
                return;
            }
        };
        if self.is_hosting() && !self.peers.contains(from).await {
            // Cut off after its queue overflowed.
            return;
        }
        if self.is_hosting() && message.sender_id != *from {
            tracing::warn!(
                %from,
                claimed = %message.sender_id,
                "dropping message with a forged sender"
            );
            return;
        }

        self.peers.touch(from, &message).await;
        self.emit(TransportEvent::MessageReceived {
            message,
            from: from.clone(),
        });

        if self.is_hosting() {
            match encode_frame(&payload) {
                Ok(frame) => {
                    let fanout = self.peers.broadcast(Arc::from(frame), Some(from)).await;
                    self.shed(fanout).await;
                }
                Err(e) => tracing::debug!(%from, error = %e, "cannot relay"),
            }
        }
    }

    /// Drops every link whose outbound queue overflowed.
    async fn shed(&self, fanout: Fanout) {
        for peer_id in fanout.overflowed {
            tracing::warn!(%peer_id, "peer stopped reading, dropping link");
            self.drop_peer(&peer_id).await;
        }
    }

    /// A link closed on its own (not by leave).
    async fn drop_peer(&self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).await.is_none() {
            return;
        }
        tracing::info!(%peer_id, "peer disconnected");

        if self.is_hosting() {
            let count = self.peers.connected_count().await + 1;
            if let Some(session) = self.session.write().await.as_mut() {
                session.current_players = count;
            }
            self.emit(TransportEvent::PeerDisconnected(peer_id.clone()));
        } else {
            // Our only link was to the host: the session is over for us.
            self.emit(TransportEvent::PeerDisconnected(peer_id.clone()));
            drop(self.stop_tasks());
            self.reset().await;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Checks a join request and registers the joiner.
    ///
    /// Runs under the session write lock so concurrent joins can't both
    /// take the last seat.
    async fn admit(
        &self,
        request: JoinRequest,
        endpoint: SocketAddr,
        writer: OwnedWriteHalf,
    ) -> Result<PeerInfo, (String, OwnedWriteHalf)> {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return Err(("no session".into(), writer));
        };

        if session.started {
            return Err(("game already started".into(), writer));
        }
        if !session.password_matches(request.password.as_deref()) {
            return Err(("wrong password".into(), writer));
        }
        if request.peer_id == self.local_id
            || self.peers.contains(&request.peer_id).await
        {
            return Err(("peer id already in use".into(), writer));
        }
        let connected = self.peers.connected_count().await;
        if connected + 1 >= session.max_players {
            return Err(("session is full".into(), writer));
        }

        session.current_players = connected + 2;
        let host = connected_peer(
            self.local_id.clone(),
            &session.host_name,
            session.address.clone(),
            true,
        );
        let accepted = JoinResponse::Accepted {
            session: session.clone(),
            host,
        };
        let frame = match self
            .codec
            .encode(&accepted)
            .map_err(TransportError::from)
            .and_then(|p| encode_frame(&p).map_err(TransportError::from))
        {
            Ok(frame) => frame,
            Err(e) => {
                session.current_players = connected + 1;
                return Err((e.to_string(), writer));
            }
        };

        let peer = connected_peer(
            request.peer_id,
            &request.player_name,
            endpoint.to_string(),
            false,
        );
        let tx = spawn_writer(peer.peer_id.clone(), writer);
        // A fresh queue always has room.
        let _ = tx.try_send(Arc::from(frame));
        self.peers.insert(peer.clone(), Some(tx)).await;
        Ok(peer)
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Host: accept game connections until told to stop.
async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                let task = tokio::spawn(serve_joiner(
                    Arc::clone(&inner),
                    stream,
                    addr,
                    shutdown.clone(),
                ));
                inner.track(task);
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    tracing::debug!("accept loop stopped");
}

/// Host: run the join handshake for one connection, then its link.
async fn serve_joiner(
    inner: Arc<Inner>,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let provisional = PeerId::random();
    inner
        .peers
        .insert(PeerInfo::connecting(provisional.clone(), addr.to_string()), None)
        .await;
    tracing::debug!(%addr, peer_id = %provisional, "connection accepted");

    let (mut reader, mut writer) = stream.into_split();

    let first = tokio::select! {
        _ = shutdown.changed() => None,
        first = tokio::time::timeout(
            inner.config.request_timeout,
            read_frame(&mut reader),
        ) => Some(first),
    };
    inner.peers.remove(&provisional).await;

    let request = match first {
        None => return,
        Some(Ok(Ok(Some(payload)))) => {
            match inner.codec.decode::<JoinRequest>(&payload) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "first frame was not a join request");
                    reject(&inner, &mut writer, "expected join request").await;
                    return;
                }
            }
        }
        Some(Ok(Ok(None))) => return,
        Some(Ok(Err(e))) => {
            tracing::warn!(%addr, error = %e, "framing error during join");
            return;
        }
        Some(Err(_)) => {
            tracing::debug!(%addr, "join handshake timed out");
            return;
        }
    };

    let peer = match inner.admit(request, addr, writer).await {
        Ok(peer) => peer,
        Err((reason, mut writer)) => {
            tracing::info!(%addr, %reason, "join rejected");
            reject(&inner, &mut writer, &reason).await;
            return;
        }
    };

    tracing::info!(
        peer_id = %peer.peer_id,
        name = %peer.display_name(),
        %addr,
        "peer joined"
    );
    let peer_id = peer.peer_id.clone();
    inner.emit(TransportEvent::PeerConnected(peer));
    run_link(inner, peer_id, reader, shutdown).await;
}

async fn reject(inner: &Inner, writer: &mut OwnedWriteHalf, reason: &str) {
    let response = JoinResponse::Rejected {
        reason: reason.to_string(),
    };
    if let Ok(payload) = inner.codec.encode(&response) {
        let _ = write_frame(writer, &payload).await;
    }
}

/// Reads one link until it closes, fails, or the session ends.
async fn run_link(
    inner: Arc<Inner>,
    peer_id: PeerId,
    mut reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Some(payload)) => inner.on_frame(&peer_id, payload).await,
            Ok(None) => {
                tracing::debug!(%peer_id, "link closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer_id, error = %e, "closing link after framing error");
                break;
            }
        }
    }
    inner.drop_peer(&peer_id).await;
}

/// Host: answer discovery requests while the session takes players.
async fn discovery_responder(
    inner: Arc<Inner>,
    socket: UdpSocket,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, requester) = match received {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "discovery recv failed");
                continue;
            }
        };
        if !discovery::is_discovery_request(&buf[..len]) {
            continue;
        }

        let response = {
            let session = inner.session.read().await;
            match session.as_ref() {
                Some(s) if s.is_joinable() => {
                    discovery::encode_discovery_response(s)
                }
                _ => continue,
            }
        };
        match response {
            Ok(datagram) => {
                if let Err(e) = socket.send_to(&datagram, requester).await {
                    tracing::debug!(%requester, error = %e, "discovery reply failed");
                }
            }
            Err(e) => tracing::debug!(error = %e, "cannot encode discovery reply"),
        }
    }
    tracing::debug!("discovery responder stopped");
}

// ---------------------------------------------------------------------------
// PeerTransport
// ---------------------------------------------------------------------------

impl PeerTransport for LanTransport {
    fn local_peer_id(&self) -> PeerId {
        self.inner.local_id.clone()
    }

    fn is_host(&self) -> bool {
        self.inner.is_hosting()
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
        let config = &self.inner.config;
        let socket = UdpSocket::bind(SocketAddr::new(config.bind_ip, 0))
            .await
            .map_err(TransportError::BindFailed)?;
        socket
            .set_broadcast(true)
            .map_err(TransportError::BindFailed)?;
        socket
            .send_to(DISCOVERY_REQUEST, config.discovery_target)
            .await
            .map_err(TransportError::SendFailed)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received =
                tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                    .await;
            let (len, source) = match received {
                Err(_) => break,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "discovery recv failed");
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            match discovery::decode_discovery_response(&buf[..len], source) {
                Ok(session) => {
                    if seen.insert(session.session_id.clone()) {
                        found.push(session);
                    }
                }
                Err(e) => {
                    tracing::debug!(%source, error = %e, "ignoring stray datagram");
                }
            }
        }

        tracing::info!(count = found.len(), "discovery finished");
        Ok(found)
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
        let inner = &self.inner;
        if inner.session.read().await.is_some() {
            return Err(TransportError::AlreadyInSession);
        }

        let config = &inner.config;
        let listener =
            TcpListener::bind(SocketAddr::new(config.bind_ip, config.game_port))
                .await
                .map_err(TransportError::BindFailed)?;
        let game_addr =
            listener.local_addr().map_err(TransportError::BindFailed)?;
        let responder = UdpSocket::bind(SocketAddr::new(
            config.bind_ip,
            config.discovery_port,
        ))
        .await
        .map_err(TransportError::BindFailed)?;
        let discovery_addr =
            responder.local_addr().map_err(TransportError::BindFailed)?;

        let mut session = SessionInfo::hosted(
            inner.local_id.clone(),
            player_name,
            name,
            max_players,
            password,
            TransportKind::Lan,
        );
        session.address = game_addr.to_string();

        {
            let mut slot = inner.session.write().await;
            if slot.is_some() {
                return Err(TransportError::AlreadyInSession);
            }
            *slot = Some(session.clone());
        }
        inner.hosting.store(true, Ordering::Release);

        let (shutdown, _) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(
            Arc::clone(inner),
            listener,
            shutdown.subscribe(),
        ));
        let discover = tokio::spawn(discovery_responder(
            Arc::clone(inner),
            responder,
            shutdown.subscribe(),
        ));
        *inner.tasks.lock() = Some(SessionTasks {
            shutdown,
            handles: vec![accept, discover],
            game_addr: Some(game_addr),
            discovery_addr: Some(discovery_addr),
        });

        tracing::info!(
            session_id = %session.session_id,
            name = %session.name,
            %game_addr,
            %discovery_addr,
            "hosting session"
        );
        inner.set_state(ConnectionState::Connected);
        Ok(session)
    }

    async fn join_session(
        &self,
        session: &SessionInfo,
        player_name: &str,
        password: Option<String>,
    ) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.session.read().await.is_some() {
            return Err(TransportError::AlreadyInSession);
        }
        let addr: SocketAddr = session.address.parse().map_err(|_| {
            TransportError::InvalidArgument(format!(
                "bad session address {:?}",
                session.address
            ))
        })?;

        inner.set_state(ConnectionState::Connecting);
        let (reader, writer, mut joined, host) =
            match self.handshake(addr, player_name, password).await {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::info!(%addr, error = %e, "join failed");
                    inner.set_state(ConnectionState::Failed);
                    return Err(e);
                }
            };

        joined.address = addr.to_string();
        let host_id = host.peer_id.clone();
        let tx = spawn_writer(host_id.clone(), writer);
        inner.peers.insert(host.clone(), Some(tx)).await;
        *inner.session.write().await = Some(joined.clone());

        let (shutdown, link_shutdown) = watch::channel(false);
        *inner.tasks.lock() = Some(SessionTasks {
            shutdown,
            handles: Vec::new(),
            game_addr: None,
            discovery_addr: None,
        });
        let link = tokio::spawn(run_link(
            Arc::clone(inner),
            host_id,
            reader,
            link_shutdown,
        ));
        inner.track(link);

        tracing::info!(
            session_id = %joined.session_id,
            host = %host.display_name(),
            "joined session"
        );
        inner.set_state(ConnectionState::Connected);
        inner.emit(TransportEvent::PeerConnected(host));
        Ok(())
    }

    async fn leave_session(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.session.read().await.is_none() {
            return Ok(());
        }

        let goodbye = self.new_message(MessageBody::PlayerLeft(PlayerLeft {
            player_id: inner.local_id.clone(),
            reason: "left the session".into(),
        }));
        if let Err(e) = self.send_to_all(&goodbye).await {
            tracing::debug!(error = %e, "leave notification not sent");
        }

        for handle in inner.stop_tasks() {
            handle.abort();
            let _ = handle.await;
        }
        inner.reset().await;
        inner.set_state(ConnectionState::Disconnected);
        tracing::info!("left session");
        Ok(())
    }

    async fn send_to_all(
        &self,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.session.read().await.is_none() {
            return Err(TransportError::NotInSession);
        }
        let frame = inner.frame(message)?;
        let fanout = inner.peers.broadcast(frame, None).await;
        inner.shed(fanout).await;
        Ok(())
    }

    async fn send_to(
        &self,
        peer_id: &PeerId,
        message: &NetworkMessage,
    ) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.session.read().await.is_none() {
            return Err(TransportError::NotInSession);
        }
        let frame = inner.frame(message)?;
        match inner.peers.send(peer_id, frame).await {
            Queued::Sent => Ok(()),
            Queued::NoLink => Err(TransportError::UnknownPeer(peer_id.clone())),
            Queued::Overflow => {
                inner.shed(Fanout {
                    delivered: 0,
                    overflowed: vec![peer_id.clone()],
                })
                .await;
                Err(TransportError::UnknownPeer(peer_id.clone()))
            }
        }
    }

    async fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.connected().await
    }

    async fn current_session(&self) -> Option<SessionInfo> {
        self.inner.session.read().await.clone()
    }

    async fn mark_started(&self) -> Result<(), TransportError> {
        if !self.inner.is_hosting() {
            return Err(TransportError::NotHost);
        }
        let mut session = self.inner.session.write().await;
        let session = session.as_mut().ok_or(TransportError::NotInSession)?;
        session.started = true;
        tracing::info!(session_id = %session.session_id, "session started");
        Ok(())
    }
}
