use std::time::Duration;

use dicelink::prelude::*;
use dicelink::sync::{Scorer, YatzyScorer};
use tracing_subscriber::EnvFilter;

/// Full rounds to play before stopping.
const ROUNDS: u32 = 2;

/// Spacing between actions; the validator refuses bursts.
const PACE: Duration = Duration::from_millis(150);

type Node = GameNode<LanTransport>;

// ---------------------------------------------------------------------------
// Bot strategy
// ---------------------------------------------------------------------------

/// Holds every die showing the most common face (highest face on ties).
fn keep_most_common(dice: [u8; 5]) -> [bool; 5] {
    let mut counts = [0usize; 7];
    for &v in &dice {
        counts[usize::from(v)] += 1;
    }
    let face = (1..=6u8)
        .max_by_key(|&f| (counts[usize::from(f)], f))
        .unwrap_or(6);
    dice.map(|v| v == face)
}

/// The open category scoring the most for `dice`.
fn best_category(state: &GameState, me: &PeerId, dice: [u8; 5]) -> Option<ScoreCategory> {
    let player = state.player(me)?;
    player
        .score_card
        .available_categories()
        .into_iter()
        .max_by_key(|&c| YatzyScorer.score(c, &dice))
}

/// Rolls up to three times, then scores, which passes the turn.
async fn play_turn(node: &Node) -> Result<(), DicelinkError> {
    let mut held = [false; 5];
    for _ in 0..3 {
        node.roll(held).await?;
        tokio::time::sleep(PACE).await;
        let dice = node.state().await?.dice.values();
        if dice.iter().all(|&v| v == dice[0]) {
            break;
        }
        held = keep_most_common(dice);
    }

    let state = node.state().await?;
    let dice = state.dice.values();
    if let Some(category) = best_category(&state, &node.local_id(), dice) {
        node.score(category).await?;
        tracing::info!(
            player = node.player_name(),
            ?dice,
            %category,
            points = YatzyScorer.score(category, &dice),
            "scored"
        );
        tokio::time::sleep(PACE).await;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

async fn wait_until<F>(node: &Node, mut done: F) -> Result<GameState, DicelinkError>
where
    F: FnMut(&GameState) -> bool,
{
    loop {
        let state = node.state().await?;
        if done(&state) {
            return Ok(state);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = GameNodeBuilder::new()
        .player_name("Astrid")
        .secret("pepparkaka")
        .lan(TransportConfig::loopback());
    let session = host.host("Julbord", 2, None).await?;
    eprintln!("hosting {} at {}", session.name, session.address);

    let guest = GameNodeBuilder::new()
        .player_name("Bo")
        .secret("pepparkaka")
        .lan(TransportConfig::loopback());
    guest.join(&session, None).await?;
    wait_until(&guest, |s| s.players.len() == 2).await?;
    tokio::time::sleep(PACE).await;

    host.start(GameMode::Multiplayer).await?;
    wait_until(&guest, |s| s.started).await?;

    let nodes = [&host, &guest];
    loop {
        let state = host.state().await?;
        if state.round > ROUNDS || state.complete {
            break;
        }
        let Some(current) = state.current_player() else {
            break;
        };
        let Some(node) = nodes.iter().find(|n| n.local_id() == current.id) else {
            break;
        };
        play_turn(node).await?;

        let index = host.state().await?.current_player_index;
        wait_until(&guest, |s| s.current_player_index == index).await?;
    }

    let table = guest.state().await?;
    for player in &table.players {
        eprintln!("{:>8}: {}", player.name, player.total_score());
    }

    guest.shutdown().await?;
    host.shutdown().await?;
    Ok(())
}
