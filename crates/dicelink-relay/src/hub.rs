//! The hub: session bookkeeping plus fan-out to connected clients.
//!
//! The hub is plain synchronous state. Connection tasks call into it with
//! each decoded [`RelayCall`] and get back the [`HubEvent`] to answer
//! with; anything other clients need to hear about is pushed onto their
//! outbound channels from inside the call.
//!
//! Lock order is registry first, then clients. Neither lock is held while
//! waiting on anything.

use std::collections::HashMap;

use dicelink_protocol::relay::{HubEvent, RelayCall, RelayOp, RelayReply};
use dicelink_protocol::{ConnectionState, PeerId, PeerInfo};
use dicelink_session::SessionRegistry;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Outbound channel to one client's writer task.
pub type ClientSender = mpsc::UnboundedSender<HubEvent>;

/// Owns the session registry and every client's outbound channel.
#[derive(Default)]
pub struct RelayHub {
    registry: Mutex<SessionRegistry>,
    clients: Mutex<HashMap<PeerId, ClientSender>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client under `peer_id`. Returns `false` if the id is
    /// already connected.
    pub fn connect(&self, peer_id: PeerId, sender: ClientSender) -> bool {
        let mut clients = self.clients.lock();
        if clients.contains_key(&peer_id) {
            return false;
        }
        tracing::debug!(%peer_id, "client connected");
        clients.insert(peer_id, sender);
        true
    }

    /// Forgets a client, leaving its session on its behalf.
    pub fn disconnect(&self, peer_id: &PeerId) {
        self.depart(peer_id);
        self.clients.lock().remove(peer_id);
        tracing::debug!(%peer_id, "client disconnected");
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Executes one call from `from` and returns the reply frame.
    pub fn handle(&self, from: &PeerId, endpoint: &str, call: RelayCall) -> HubEvent {
        let call_id = call.call_id;
        match self.execute(from, endpoint, call.op) {
            Ok(reply) => HubEvent::Reply { call_id, reply },
            Err(reason) => {
                tracing::debug!(peer_id = %from, call_id, %reason, "call refused");
                HubEvent::Failed { call_id, reason }
            }
        }
    }

    fn execute(
        &self,
        from: &PeerId,
        endpoint: &str,
        op: RelayOp,
    ) -> Result<RelayReply, String> {
        match op {
            RelayOp::Hello { peer_id } => {
                if &peer_id == from {
                    Ok(RelayReply::Ack)
                } else {
                    Err("already greeted under another id".to_string())
                }
            }

            RelayOp::ListSessions => Ok(RelayReply::Sessions {
                sessions: self.registry.lock().available(),
            }),

            RelayOp::CreateSession { session, password } => {
                let mut host = PeerInfo::connecting(from.clone(), endpoint);
                host.player_name = session.host_name.clone();
                let session = self
                    .registry
                    .lock()
                    .create(host, session, password)
                    .map_err(|e| e.to_string())?;
                Ok(RelayReply::Created { session })
            }

            RelayOp::JoinSession {
                session_id,
                player_name,
                password,
            } => {
                let mut peer = PeerInfo::connecting(from.clone(), endpoint);
                peer.player_name = player_name;
                let (session, existing) = self
                    .registry
                    .lock()
                    .join(&session_id, peer.clone(), password.as_deref())
                    .map_err(|e| e.to_string())?;

                peer.state = ConnectionState::Connected;
                for member in &existing {
                    self.push(
                        &member.peer_id,
                        HubEvent::PeerJoined { peer: peer.clone() },
                    );
                }
                Ok(RelayReply::Joined {
                    session,
                    peers: existing,
                })
            }

            RelayOp::LeaveSession => {
                self.depart(from);
                Ok(RelayReply::Ack)
            }

            RelayOp::SendMessage { payload } => {
                let members = {
                    let registry = self.registry.lock();
                    let session_id = registry
                        .session_of(from)
                        .ok_or_else(|| "not in a session".to_string())?;
                    registry.members(session_id)
                };
                for member in members.iter().filter(|m| *m != from) {
                    self.push(
                        member,
                        HubEvent::Delivered {
                            from: from.clone(),
                            payload: payload.clone(),
                        },
                    );
                }
                Ok(RelayReply::Ack)
            }

            RelayOp::SendToPeer { peer_id, payload } => {
                if !self.registry.lock().same_session(from, &peer_id) {
                    return Err(format!("{peer_id} is not in your session"));
                }
                self.push(
                    &peer_id,
                    HubEvent::Delivered {
                        from: from.clone(),
                        payload,
                    },
                );
                Ok(RelayReply::Ack)
            }

            RelayOp::MarkStarted => {
                self.registry
                    .lock()
                    .mark_started(from)
                    .map_err(|e| e.to_string())?;
                Ok(RelayReply::Ack)
            }
        }
    }

    /// Takes `peer_id` out of its session and tells whoever is left.
    fn depart(&self, peer_id: &PeerId) {
        let Some(departure) = self.registry.lock().leave(peer_id) else {
            return;
        };
        for member in &departure.remaining {
            self.push(
                member,
                HubEvent::PeerLeft {
                    peer_id: peer_id.clone(),
                },
            );
        }
    }

    fn push(&self, to: &PeerId, event: HubEvent) {
        if let Some(sender) = self.clients.lock().get(to) {
            // A closed channel means the client is mid-disconnect.
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicelink_protocol::{SessionInfo, TransportKind};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(hub: &RelayHub, id: &str) -> (PeerId, UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = PeerId::new(id);
        assert!(hub.connect(peer_id.clone(), tx));
        (peer_id, rx)
    }

    fn call(op: RelayOp) -> RelayCall {
        RelayCall { call_id: 1, op }
    }

    fn create(hub: &RelayHub, host: &PeerId, password: Option<&str>) -> SessionInfo {
        let draft = SessionInfo::hosted(
            host.clone(),
            "Host",
            "Julbord",
            3,
            None,
            TransportKind::Relay,
        );
        let op = RelayOp::CreateSession {
            session: draft,
            password: password.map(String::from),
        };
        match hub.handle(host, "test", call(op)) {
            HubEvent::Reply {
                reply: RelayReply::Created { session },
                ..
            } => session,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn join(hub: &RelayHub, peer: &PeerId, session: &SessionInfo, password: Option<&str>) -> HubEvent {
        hub.handle(
            peer,
            "test",
            call(RelayOp::JoinSession {
                session_id: session.session_id.clone(),
                player_name: peer.to_string(),
                password: password.map(String::from),
            }),
        )
    }

    #[test]
    fn test_connect_duplicate_id_refused() {
        let hub = RelayHub::new();
        let (_id, _rx) = client(&hub, "a");
        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(!hub.connect(PeerId::new("a"), tx));
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn test_join_notifies_existing_members() {
        let hub = RelayHub::new();
        let (host, mut host_rx) = client(&hub, "host");
        let (guest, _guest_rx) = client(&hub, "guest");
        let session = create(&hub, &host, None);

        match join(&hub, &guest, &session, None) {
            HubEvent::Reply {
                reply: RelayReply::Joined { session, peers },
                ..
            } => {
                assert_eq!(session.current_players, 2);
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].peer_id, host);
                assert!(peers[0].is_host);
            }
            other => panic!("unexpected {other:?}"),
        }

        match host_rx.try_recv().unwrap() {
            HubEvent::PeerJoined { peer } => assert_eq!(peer.peer_id, guest),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_join_wrong_password_fails() {
        let hub = RelayHub::new();
        let (host, _host_rx) = client(&hub, "host");
        let (guest, _guest_rx) = client(&hub, "guest");
        let session = create(&hub, &host, Some("tomte"));

        assert!(matches!(
            join(&hub, &guest, &session, Some("nisse")),
            HubEvent::Failed { .. }
        ));
        assert!(matches!(
            join(&hub, &guest, &session, Some("tomte")),
            HubEvent::Reply { .. }
        ));
    }

    #[test]
    fn test_send_message_reaches_others_only() {
        let hub = RelayHub::new();
        let (host, mut host_rx) = client(&hub, "host");
        let (guest, mut guest_rx) = client(&hub, "guest");
        let session = create(&hub, &host, None);
        join(&hub, &guest, &session, None);
        let _ = host_rx.try_recv();

        let reply = hub.handle(
            &guest,
            "test",
            call(RelayOp::SendMessage {
                payload: "{}".into(),
            }),
        );
        assert!(matches!(reply, HubEvent::Reply { reply: RelayReply::Ack, .. }));
        assert!(matches!(
            host_rx.try_recv().unwrap(),
            HubEvent::Delivered { from, .. } if from == guest
        ));
        assert!(guest_rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_peer_outside_session_fails() {
        let hub = RelayHub::new();
        let (host, _host_rx) = client(&hub, "host");
        let (stranger, _rx) = client(&hub, "stranger");
        create(&hub, &host, None);

        let reply = hub.handle(
            &host,
            "test",
            call(RelayOp::SendToPeer {
                peer_id: stranger,
                payload: "{}".into(),
            }),
        );
        assert!(matches!(reply, HubEvent::Failed { .. }));
    }

    #[test]
    fn test_host_disconnect_closes_session() {
        let hub = RelayHub::new();
        let (host, _host_rx) = client(&hub, "host");
        let (guest, mut guest_rx) = client(&hub, "guest");
        let session = create(&hub, &host, None);
        join(&hub, &guest, &session, None);

        hub.disconnect(&host);
        assert_eq!(hub.session_count(), 0);
        assert!(matches!(
            guest_rx.try_recv().unwrap(),
            HubEvent::PeerLeft { peer_id } if peer_id == host
        ));
    }

    #[test]
    fn test_mark_started_hides_session() {
        let hub = RelayHub::new();
        let (host, _host_rx) = client(&hub, "host");
        let (guest, _guest_rx) = client(&hub, "guest");
        create(&hub, &host, None);

        let refused = hub.handle(&guest, "test", call(RelayOp::MarkStarted));
        assert!(matches!(refused, HubEvent::Failed { .. }));

        hub.handle(&host, "test", call(RelayOp::MarkStarted));
        match hub.handle(&guest, "test", call(RelayOp::ListSessions)) {
            HubEvent::Reply {
                reply: RelayReply::Sessions { sessions },
                ..
            } => assert!(sessions.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
