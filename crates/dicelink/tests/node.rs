//! End-to-end tests: two `GameNode`s on loopback playing through the
//! LAN transport.

use std::time::Duration;

use dicelink::prelude::*;

// =========================================================================
// Helpers
// =========================================================================

const WAIT: Duration = Duration::from_secs(5);

/// No minimum spacing, so quick test turns aren't throttled.
fn relaxed(secret: Option<&str>) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.validator.min_message_interval = Duration::ZERO;
    config.secret = secret.map(String::from);
    config
}

fn node(name: &str, secret: Option<&str>) -> GameNode<LanTransport> {
    GameNodeBuilder::new()
        .player_name(name)
        .sync_config(relaxed(secret))
        .lan(TransportConfig::loopback())
}

/// Polls `node`'s state until `done` holds.
async fn wait_for<F>(node: &GameNode<LanTransport>, mut done: F) -> GameState
where
    F: FnMut(&GameState) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let state = node.state().await.expect("sync actor running");
            if done(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("state should converge")
}

/// A host and one seated joiner, not yet started.
async fn table(secret: Option<&str>) -> (GameNode<LanTransport>, GameNode<LanTransport>) {
    let host = node("Astrid", secret);
    let session = host.host("Julbord", 4, None).await.unwrap();
    let joiner = node("Bo", secret);
    joiner.join(&session, None).await.unwrap();

    wait_for(&host, |s| s.players.len() == 2).await;
    wait_for(&joiner, |s| s.players.len() == 2).await;
    (host, joiner)
}

// =========================================================================
// Seating
// =========================================================================

#[tokio::test]
async fn test_host_takes_first_seat() {
    let host = node("Astrid", None);
    host.host("Julbord", 4, None).await.unwrap();

    let state = host.state().await.unwrap();
    assert_eq!(state.players.len(), 1);
    assert_eq!(state.players[0].id, host.local_id());
    assert_eq!(state.players[0].name, "Astrid");
    assert!(host.is_host());
}

#[tokio::test]
async fn test_host_seats_joiner_and_shares_table() {
    let (host, joiner) = table(None).await;

    let state = joiner.state().await.unwrap();
    assert_eq!(state.players[0].id, host.local_id());
    assert_eq!(state.players[1].id, joiner.local_id());
    assert_eq!(state.players[1].name, "Bo");
    assert!(!joiner.is_host());
}

#[tokio::test]
async fn test_joiner_leaving_before_start_frees_seat() {
    let (host, joiner) = table(None).await;

    joiner.leave().await.unwrap();
    let state = wait_for(&host, |s| s.players.len() == 1).await;
    assert_eq!(state.players[0].id, host.local_id());
}

// =========================================================================
// Starting
// =========================================================================

#[tokio::test]
async fn test_start_reaches_joiner() {
    let (host, joiner) = table(None).await;

    let started = host.start(GameMode::Multiplayer).await.unwrap();
    assert!(started.in_progress());
    assert!(started.is_current_player(&host.local_id()));

    let state = wait_for(&joiner, |s| s.started).await;
    assert_eq!(state.round, 1);
    assert!(state.is_current_player(&host.local_id()));
}

#[tokio::test]
async fn test_joiner_cannot_start() {
    let (_host, joiner) = table(None).await;

    let err = joiner.start(GameMode::Multiplayer).await.unwrap_err();
    assert!(matches!(err, DicelinkError::Transport(TransportError::NotHost)));
}

#[tokio::test]
async fn test_start_alone_needs_more_players() {
    let host = node("Astrid", None);
    host.host("Julbord", 4, None).await.unwrap();

    let err = host.start(GameMode::Multiplayer).await.unwrap_err();
    assert!(matches!(err, DicelinkError::Sync(SyncError::Game(_))));
    assert!(!host.state().await.unwrap().started);
}

#[tokio::test]
async fn test_skip_turn_before_start_rejected() {
    let host = node("Astrid", None);
    host.host("Julbord", 4, None).await.unwrap();

    let err = host.skip_turn().await.unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejection::NotInProgress));
}

#[tokio::test]
async fn test_default_config_six_seat_session_starts_and_rolls() {
    let host = GameNodeBuilder::new()
        .player_name("Astrid")
        .lan(TransportConfig::loopback());
    let session = host.host("Julbord", 6, None).await.unwrap();
    let joiner = GameNodeBuilder::new()
        .player_name("Bo")
        .lan(TransportConfig::loopback());
    joiner.join(&session, None).await.unwrap();

    // Start as soon as the seat is taken, so the welcome and start
    // snapshots reach the joiner back to back.
    wait_for(&host, |s| s.players.len() == 2).await;
    host.start(GameMode::Multiplayer).await.unwrap();
    let state = wait_for(&joiner, |s| s.started).await;
    assert_eq!(state.players.len(), 2);

    let mut changes = joiner.subscribe();
    host.roll([false; 5]).await.unwrap();
    let change = tokio::time::timeout(WAIT, changes.recv())
        .await
        .expect("roll notification should arrive")
        .unwrap();
    assert_eq!(change.cause, Some(MessageKind::DiceRoll));
    assert_eq!(change.state.rolls_this_turn, 1);

    let extra = tokio::time::timeout(Duration::from_millis(300), changes.recv()).await;
    assert!(extra.is_err(), "one roll, one notification");
}

// =========================================================================
// Playing
// =========================================================================

#[tokio::test]
async fn test_turn_propagates_to_joiner() {
    let (host, joiner) = table(Some("pepparkaka")).await;
    host.start(GameMode::Multiplayer).await.unwrap();
    wait_for(&joiner, |s| s.started).await;

    host.roll([false; 5]).await.unwrap();
    let rolled = host.state().await.unwrap();
    assert_eq!(rolled.rolls_this_turn, 1);
    let seen = wait_for(&joiner, |s| s.rolls_this_turn == 1).await;
    assert_eq!(seen.dice.values(), rolled.dice.values());

    host.score(ScoreCategory::Chance).await.unwrap();
    let host_id = host.local_id();
    let seen = wait_for(&joiner, |s| {
        s.player(&host_id)
            .is_some_and(|p| p.score_card.is_scored(ScoreCategory::Chance))
    })
    .await;
    let expected: u32 = rolled.dice.values().iter().map(|&v| u32::from(v)).sum();
    assert_eq!(
        seen.player(&host_id).unwrap().score_card.score(ScoreCategory::Chance),
        Some(expected)
    );

    // Scoring passed the turn.
    let joiner_id = joiner.local_id();
    assert!(host.state().await.unwrap().is_current_player(&joiner_id));
    wait_for(&joiner, |s| s.is_current_player(&joiner_id)).await;

    joiner.roll([false; 5]).await.unwrap();
    wait_for(&host, |s| {
        s.is_current_player(&joiner_id) && s.rolls_this_turn == 1
    })
    .await;
}

#[tokio::test]
async fn test_host_skip_turn_moves_to_next_seat() {
    let (host, joiner) = table(None).await;
    host.start(GameMode::Multiplayer).await.unwrap();
    wait_for(&joiner, |s| s.started).await;

    let err = joiner.skip_turn().await.unwrap_err();
    assert!(matches!(err, DicelinkError::Transport(TransportError::NotHost)));

    host.skip_turn().await.unwrap();
    let joiner_id = joiner.local_id();
    assert!(host.state().await.unwrap().is_current_player(&joiner_id));
    wait_for(&joiner, |s| s.is_current_player(&joiner_id)).await;
}

#[tokio::test]
async fn test_forged_roll_from_joiner_is_never_applied() {
    let (host, joiner) = table(None).await;
    host.start(GameMode::Multiplayer).await.unwrap();
    wait_for(&joiner, |s| s.started).await;

    // The joiner poses as the host, whose turn it is.
    let host_id = host.local_id();
    let forged = NetworkMessage::new(
        host_id.clone(),
        1,
        MessageBody::DiceRoll(dicelink::protocol::DiceRoll {
            player_id: host_id,
            dice_values: vec![6; 5],
            held_dice: vec![false; 5],
            roll_number: 1,
        }),
    );
    joiner.transport().send_to_all(&forged).await.unwrap();

    // A genuine message sent after it arrives, so the forged one was seen
    // and dropped by then.
    let mut events = host.events();
    let chat = joiner
        .transport()
        .new_message(MessageBody::Chat(dicelink::protocol::Chat {
            player_name: "Bo".into(),
            message: "god jul".into(),
        }));
    joiner.transport().send_to_all(&chat).await.unwrap();
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(TransportEvent::MessageReceived { message, .. }) = events.recv().await {
                if message.kind() == MessageKind::Chat {
                    return;
                }
            }
        }
    })
    .await
    .expect("chat should arrive");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = host.state().await.unwrap();
    assert_eq!(state.rolls_this_turn, 0);
}

#[tokio::test]
async fn test_out_of_turn_roll_is_refused_locally() {
    let (host, joiner) = table(None).await;
    host.start(GameMode::Multiplayer).await.unwrap();
    wait_for(&joiner, |s| s.started).await;

    let err = joiner.roll([false; 5]).await.unwrap_err();
    assert_eq!(
        err.rejection(),
        Some(&Rejection::NotYourTurn(joiner.local_id()))
    );
    assert_eq!(host.state().await.unwrap().rolls_this_turn, 0);
}

#[tokio::test]
async fn test_state_notifications_follow_actions() {
    let (host, joiner) = table(None).await;
    let mut changes = joiner.subscribe();
    host.start(GameMode::Multiplayer).await.unwrap();
    wait_for(&joiner, |s| s.started).await;
    host.roll([false; 5]).await.unwrap();

    let rolled = tokio::time::timeout(WAIT, async {
        loop {
            let change = changes.recv().await.expect("notifications open");
            if change.cause == Some(MessageKind::DiceRoll) {
                return change;
            }
        }
    })
    .await
    .expect("roll notification should arrive");
    assert_eq!(rolled.state.rolls_this_turn, 1);
}

#[tokio::test]
async fn test_shutdown_leaves_session() {
    let (host, joiner) = table(None).await;
    joiner.shutdown().await.unwrap();
    wait_for(&host, |s| s.players.len() == 1).await;
}
