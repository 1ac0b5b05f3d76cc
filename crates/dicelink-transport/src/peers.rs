//! The peer registry shared by a transport's connection tasks.
//!
//! Each connection task inserts its peer on accept and removes it when
//! the link closes, so the table sits behind an async `RwLock`. Outbound
//! bytes never go through the lock holder: every link has its own writer
//! task fed by a bounded channel of ready-made frames, and sending is
//! just a channel push. A peer that stops reading fills its queue and is
//! reported as overflowed so the transport can cut it off.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dicelink_protocol::{
    ConnectionState, MessageBody, NetworkMessage, PeerId, PeerInfo,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};

/// Frames a link may have queued before it counts as stalled.
pub(crate) const OUTBOUND_QUEUE: usize = 256;

/// Channel into a link's writer task. Items are complete frames.
pub(crate) type FrameSender = mpsc::Sender<Arc<[u8]>>;

/// What happened to a frame queued for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queued {
    Sent,
    /// No open link to that peer.
    NoLink,
    /// The link's queue is full; it should be dropped.
    Overflow,
}

/// Result of queueing a frame for several peers.
#[derive(Debug, Default)]
pub(crate) struct Fanout {
    pub(crate) delivered: usize,
    pub(crate) overflowed: Vec<PeerId>,
}

fn queue(tx: &FrameSender, frame: Arc<[u8]>) -> Queued {
    match tx.try_send(frame) {
        Ok(()) => Queued::Sent,
        Err(TrySendError::Full(_)) => Queued::Overflow,
        Err(TrySendError::Closed(_)) => Queued::NoLink,
    }
}

struct PeerEntry {
    info: PeerInfo,
    /// `None` while the join handshake is in progress, and always for
    /// relay peers, which have no direct link.
    outbound: Option<FrameSender>,
}

#[derive(Default)]
pub(crate) struct PeerTable {
    entries: RwLock<HashMap<PeerId, PeerEntry>>,
}

impl PeerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(
        &self,
        info: PeerInfo,
        outbound: Option<FrameSender>,
    ) {
        self.entries
            .write()
            .await
            .insert(info.peer_id.clone(), PeerEntry { info, outbound });
    }

    pub(crate) async fn remove(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.entries.write().await.remove(peer_id).map(|e| e.info)
    }

    pub(crate) async fn contains(&self, peer_id: &PeerId) -> bool {
        self.entries.read().await.contains_key(peer_id)
    }

    /// Peers that completed their join.
    pub(crate) async fn connected_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.info.state.is_connected())
            .count()
    }

    pub(crate) async fn connected(&self) -> Vec<PeerInfo> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.info.state.is_connected())
            .map(|e| e.info.clone())
            .collect()
    }

    /// Refreshes liveness, and latency for heartbeats.
    pub(crate) async fn touch(&self, peer_id: &PeerId, message: &NetworkMessage) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(peer_id) {
            entry.info.last_seen = Utc::now();
            if matches!(message.body, MessageBody::Heartbeat(_)) {
                entry.info.latency_ms = crate::latency_ms(message);
            }
        }
    }

    /// Queues a frame for one peer without waiting.
    pub(crate) async fn send(&self, peer_id: &PeerId, frame: Arc<[u8]>) -> Queued {
        match self.entries.read().await.get(peer_id) {
            Some(PeerEntry {
                outbound: Some(tx), ..
            }) => queue(tx, frame),
            _ => Queued::NoLink,
        }
    }

    /// Queues a frame for every linked peer except `except`. Closed links
    /// are skipped; full ones come back in [`Fanout::overflowed`].
    pub(crate) async fn broadcast(
        &self,
        frame: Arc<[u8]>,
        except: Option<&PeerId>,
    ) -> Fanout {
        let entries = self.entries.read().await;
        let mut fanout = Fanout::default();
        for (peer_id, entry) in entries.iter() {
            if Some(peer_id) == except {
                continue;
            }
            let Some(tx) = &entry.outbound else {
                continue;
            };
            match queue(tx, Arc::clone(&frame)) {
                Queued::Sent => fanout.delivered += 1,
                Queued::Overflow => fanout.overflowed.push(peer_id.clone()),
                Queued::NoLink => {}
            }
        }
        fanout
    }

    /// Drops every entry. Writer tasks see their channel close, flush
    /// what is queued, and shut their socket down.
    pub(crate) async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Spawns the writer task for one link and returns its input channel.
pub(crate) fn spawn_writer<W>(peer_id: PeerId, mut writer: W) -> FrameSender
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Arc<[u8]>>(OUTBOUND_QUEUE);
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                tracing::debug!(%peer_id, error = %e, "write failed, closing link");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    tx
}

/// A connected peer record.
pub(crate) fn connected_peer(
    peer_id: PeerId,
    player_name: &str,
    endpoint: impl Into<String>,
    is_host: bool,
) -> PeerInfo {
    let mut info = PeerInfo::connecting(peer_id, endpoint);
    info.player_name = player_name.to_string();
    info.is_host = is_host;
    info.state = ConnectionState::Connected;
    info
}
