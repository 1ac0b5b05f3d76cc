//! Integration tests: the relay transport client against a real hub.
//!
//! Each test starts its own hub on an OS-assigned loopback port and talks
//! to it through `RelayTransport`, the same contract the LAN transport
//! implements.

use std::sync::Arc;
use std::time::Duration;

use dicelink_protocol::{
    Chat, ConnectionState, MessageBody, PeerId, SessionInfo, TransportKind,
};
use dicelink_relay::{RelayConfig, RelayHub, RelayServer};
use dicelink_transport::{
    PeerTransport, RelayTransport, TransportConfig, TransportError,
    TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Starts a hub and returns its WebSocket URL.
async fn start_hub() -> (String, Arc<RelayHub>) {
    let server = RelayServer::bind(RelayConfig::loopback()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let hub = server.hub();
    tokio::spawn(server.run());
    (format!("ws://{addr}"), hub)
}

async fn client(url: &str, id: &str) -> RelayTransport {
    RelayTransport::connect_as(url, TransportConfig::loopback(), PeerId::new(id))
        .await
        .expect("should reach hub")
}

async fn next_event<F>(
    rx: &mut broadcast::Receiver<TransportEvent>,
    mut matches: F,
) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event should arrive")
}

async fn hosted(url: &str, password: Option<&str>) -> (RelayTransport, SessionInfo) {
    let host = client(url, "host").await;
    let session = host
        .create_session("Julbord", "Host", 3, password.map(String::from))
        .await
        .unwrap();
    (host, session)
}

fn chat(transport: &RelayTransport, text: &str) -> dicelink_protocol::NetworkMessage {
    transport.new_message(MessageBody::Chat(Chat {
        player_name: "tester".into(),
        message: text.into(),
    }))
}

// =========================================================================
// Sessions
// =========================================================================

#[tokio::test]
async fn test_create_session_is_listed() {
    let (url, hub) = start_hub().await;
    let (host, session) = hosted(&url, Some("tomte")).await;
    assert!(host.is_host());
    assert_eq!(session.transport, TransportKind::Relay);
    assert_eq!(session.address, session.session_id.to_string());
    assert_eq!(hub.session_count(), 1);

    let seeker = client(&url, "seeker").await;
    let found = seeker.discover_sessions(WAIT).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].session_id, session.session_id);
    assert!(found[0].requires_password);
    assert_eq!(found[0].password, None);
}

#[tokio::test]
async fn test_join_session_connects_both_sides() {
    let (url, _hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let mut host_events = host.subscribe();

    let guest = client(&url, "guest").await;
    let mut guest_events = guest.subscribe();
    guest.join_session(&session, "Guest", None).await.unwrap();

    let joined = next_event(&mut host_events, |e| {
        matches!(e, TransportEvent::PeerConnected(_))
    })
    .await;
    let TransportEvent::PeerConnected(peer) = joined else {
        unreachable!()
    };
    assert_eq!(peer.peer_id, PeerId::new("guest"));
    assert_eq!(peer.player_name, "Guest");

    let hello = next_event(&mut guest_events, |e| {
        matches!(e, TransportEvent::PeerConnected(_))
    })
    .await;
    let TransportEvent::PeerConnected(peer) = hello else {
        unreachable!()
    };
    assert!(peer.is_host);
    assert_eq!(guest.connection_state(), ConnectionState::Connected);
    assert_eq!(guest.current_session().await.unwrap().current_players, 2);
}

#[tokio::test]
async fn test_join_wrong_password_rejected() {
    let (url, _hub) = start_hub().await;
    let (_host, session) = hosted(&url, Some("tomte")).await;

    let guest = client(&url, "guest").await;
    let result = guest.join_session(&session, "Guest", Some("nisse".into())).await;
    assert!(matches!(result, Err(TransportError::JoinRejected(_))));
    assert_eq!(guest.connection_state(), ConnectionState::Failed);

    guest
        .join_session(&session, "Guest", Some("tomte".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_started_session_is_not_listed() {
    let (url, _hub) = start_hub().await;
    let (host, _session) = hosted(&url, None).await;
    host.mark_started().await.unwrap();

    let seeker = client(&url, "seeker").await;
    assert!(seeker.discover_sessions(WAIT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_peer_id_refused() {
    let (url, _hub) = start_hub().await;
    let _first = client(&url, "twin").await;
    let second = RelayTransport::connect_as(
        &url,
        TransportConfig::loopback(),
        PeerId::new("twin"),
    )
    .await;
    assert!(matches!(second, Err(TransportError::Refused(_))));
}

// =========================================================================
// Messaging
// =========================================================================

#[tokio::test]
async fn test_send_to_all_reaches_other_members() {
    let (url, _hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let guest = client(&url, "guest").await;
    let other = client(&url, "other").await;
    guest.join_session(&session, "Guest", None).await.unwrap();
    other.join_session(&session, "Other", None).await.unwrap();

    let mut host_events = host.subscribe();
    let mut other_events = other.subscribe();
    let message = chat(&guest, "god jul");
    guest.send_to_all(&message).await.unwrap();

    for rx in [&mut host_events, &mut other_events] {
        let event = next_event(rx, |e| {
            matches!(e, TransportEvent::MessageReceived { .. })
        })
        .await;
        let TransportEvent::MessageReceived { message: got, from } = event else {
            unreachable!()
        };
        assert_eq!(got, message);
        assert_eq!(from, PeerId::new("guest"));
    }
}

#[tokio::test]
async fn test_forged_sender_is_dropped() {
    let (url, _hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let guest = client(&url, "guest").await;
    guest.join_session(&session, "Guest", None).await.unwrap();

    let mut host_events = host.subscribe();
    let mut forged = chat(&guest, "jag är värden");
    forged.sender_id = PeerId::new("other");
    guest.send_to_all(&forged).await.unwrap();
    let genuine = chat(&guest, "god jul");
    guest.send_to_all(&genuine).await.unwrap();

    let event = next_event(&mut host_events, |e| {
        matches!(e, TransportEvent::MessageReceived { .. })
    })
    .await;
    assert!(matches!(
        event,
        TransportEvent::MessageReceived { message, .. } if message == genuine
    ));
}

#[tokio::test]
async fn test_send_to_one_peer() {
    let (url, _hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let guest = client(&url, "guest").await;
    let mut guest_events = guest.subscribe();
    guest.join_session(&session, "Guest", None).await.unwrap();

    let mut host_events = host.subscribe();
    next_event(&mut host_events, |e| matches!(e, TransportEvent::PeerConnected(_))).await;

    let message = chat(&host, "bara till dig");
    host.send_to(&PeerId::new("guest"), &message).await.unwrap();
    let event = next_event(&mut guest_events, |e| {
        matches!(e, TransportEvent::MessageReceived { .. })
    })
    .await;
    assert!(matches!(
        event,
        TransportEvent::MessageReceived { message: got, .. } if got == message
    ));

    let unknown = host.send_to(&PeerId::new("nobody"), &message).await;
    assert!(matches!(unknown, Err(TransportError::UnknownPeer(_))));
}

// =========================================================================
// Leaving
// =========================================================================

#[tokio::test]
async fn test_guest_leave_is_reported() {
    let (url, _hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let mut host_events = host.subscribe();
    let guest = client(&url, "guest").await;
    guest.join_session(&session, "Guest", None).await.unwrap();
    next_event(&mut host_events, |e| matches!(e, TransportEvent::PeerConnected(_))).await;

    guest.leave_session().await.unwrap();
    let gone = next_event(&mut host_events, |e| {
        matches!(e, TransportEvent::PeerDisconnected(_))
    })
    .await;
    assert!(matches!(gone, TransportEvent::PeerDisconnected(id) if id == PeerId::new("guest")));
    assert!(host.peers().await.is_empty());
}

#[tokio::test]
async fn test_host_disconnect_ends_session_for_guest() {
    let (url, hub) = start_hub().await;
    let (host, session) = hosted(&url, None).await;
    let guest = client(&url, "guest").await;
    let mut guest_events = guest.subscribe();
    guest.join_session(&session, "Guest", None).await.unwrap();

    drop(host);
    next_event(&mut guest_events, |e| {
        matches!(e, TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected))
    })
    .await;
    assert!(guest.current_session().await.is_none());

    tokio::time::timeout(WAIT, async {
        while hub.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("hub should drop the session");
}

// =========================================================================
// Raw protocol
// =========================================================================

#[tokio::test]
async fn test_first_call_must_be_hello() {
    let (url, hub) = start_hub().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::Text(
        r#"{"call_id":7,"op":"list_sessions"}"#.to_string().into(),
    ))
    .await
    .unwrap();

    let reply = tokio::time::timeout(WAIT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = reply else {
        panic!("expected text frame");
    };
    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["event"], "failed");
    assert_eq!(json["call_id"], 7);
    assert_eq!(hub.client_count(), 0);
}
