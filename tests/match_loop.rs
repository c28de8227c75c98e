//! The async match driver against real channels and a real clock

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use arcade_sync::config::GameConfig;
use arcade_sync::game::entity::PlayerId;
use arcade_sync::game::{GameMatch, GamePhase, JoinFailure, MatchCommand, MatchRegistry};
use arcade_sync::store::{InMemoryScoreStore, ScoreRepository};
use arcade_sync::util::time::{Clock, SystemClock};
use arcade_sync::ws::protocol::{ClientMsg, ErrorCode, Outbound, ServerMsg};

fn quick_config() -> GameConfig {
    let mut config = GameConfig::default();
    config.simulation.ending_grace_ms = 50;
    config
}

/// Next message addressed to `player` that satisfies `pred`
async fn next_matching(
    rx: &mut broadcast::Receiver<Outbound>,
    player: PlayerId,
    pred: impl Fn(&ServerMsg) -> bool,
) -> ServerMsg {
    loop {
        match rx.recv().await {
            Ok(out) if out.is_for(&player) && pred(&out.msg) => return out.msg,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("match channel closed"),
        }
    }
}

#[tokio::test]
async fn join_receives_joined_then_full_state() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let player = Uuid::from_u128(1);
    let (game_match, handle) = GameMatch::new(Uuid::from_u128(10), 3, quick_config(), None, clock);
    let mut rx = handle.subscribe();
    let task = tokio::spawn(game_match.run());

    assert_ok!(
        handle
            .command_tx
            .send(MatchCommand::Join {
                player_id: player,
                display_name: "ada".into(),
            })
            .await
    );

    let joined = timeout(
        Duration::from_secs(2),
        next_matching(&mut rx, player, |m| matches!(m, ServerMsg::Joined { .. })),
    )
    .await;
    assert!(matches!(assert_ok!(joined), ServerMsg::Joined { seed: 3, .. }));

    let state = timeout(
        Duration::from_secs(2),
        next_matching(&mut rx, player, |m| matches!(m, ServerMsg::State { .. })),
    )
    .await;
    match assert_ok!(state) {
        ServerMsg::State { state } => {
            // The first send can precede the tick that starts the game
            assert!(matches!(state.phase, GamePhase::Waiting | GamePhase::Active));
            assert!(state.verify());
            assert!(state.player(&player).is_some());
        }
        other => panic!("unexpected {other:?}"),
    }

    task.abort();
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let player = Uuid::from_u128(2);
    let (game_match, handle) = GameMatch::new(Uuid::from_u128(11), 4, quick_config(), None, clock);
    let mut rx = handle.subscribe();
    let task = tokio::spawn(game_match.run());

    handle
        .command_tx
        .send(MatchCommand::Join {
            player_id: player,
            display_name: "bo".into(),
        })
        .await
        .unwrap();
    handle
        .command_tx
        .send(MatchCommand::Client {
            player_id: player,
            msg: ClientMsg::Ping { t: 42 },
            received_at: 0,
        })
        .await
        .unwrap();

    let pong = timeout(
        Duration::from_secs(2),
        next_matching(&mut rx, player, |m| matches!(m, ServerMsg::Pong { .. })),
    )
    .await;
    assert!(matches!(assert_ok!(pong), ServerMsg::Pong { t: 42, .. }));

    task.abort();
}

#[tokio::test]
async fn last_leave_ends_match_and_persists_scores() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scores = Arc::new(InMemoryScoreStore::new());
    let registry = Arc::new(MatchRegistry::new());
    let player = Uuid::from_u128(3);

    let store: Arc<dyn ScoreRepository> = scores.clone();
    let handle = registry.find_or_spawn(&quick_config(), Some(store), clock);
    assert_eq!(registry.active_matches(), 1);
    let mut rx = handle.subscribe();

    handle
        .command_tx
        .send(MatchCommand::Join {
            player_id: player,
            display_name: "cy".into(),
        })
        .await
        .unwrap();
    timeout(
        Duration::from_secs(2),
        next_matching(&mut rx, player, |m| matches!(m, ServerMsg::State { .. })),
    )
    .await
    .unwrap();

    handle
        .command_tx
        .send(MatchCommand::Leave {
            player_id: player,
            reason: "quit".into(),
        })
        .await
        .unwrap();

    let finished = timeout(Duration::from_secs(3), async {
        while registry.active_matches() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_ok!(finished);

    let record = scores.get(&player).expect("score recorded on leave");
    assert_eq!(record.games_played, 1);
    assert_eq!(record.display_name, "cy");

    // The task is gone, so the command channel is closed
    let late = handle
        .command_tx
        .send(MatchCommand::Join {
            player_id: Uuid::from_u128(4),
            display_name: "late".into(),
        })
        .await;
    assert_err!(late);
}

#[tokio::test]
async fn registry_reuses_open_matches() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(MatchRegistry::new());
    let config = quick_config();

    let first = registry.find_or_spawn(&config, None, clock.clone());
    let second = registry.find_or_spawn(&config, None, clock);
    assert_eq!(first.id, second.id);
    assert_eq!(registry.active_matches(), 1);
}

#[tokio::test]
async fn join_after_last_leave_lands_in_a_fresh_match() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(MatchRegistry::new());
    let mut config = quick_config();
    config.simulation.ending_grace_ms = 3_000;
    let first_player = Uuid::from_u128(5);
    let second_player = Uuid::from_u128(6);

    let ending = registry.find_or_spawn(&config, None, clock.clone());
    let joined = ending
        .join(first_player, "dee".into(), Duration::from_secs(2))
        .await;
    assert!(matches!(assert_ok!(joined).0, ServerMsg::Joined { .. }));
    assert!(ending.is_accepting_joins());

    assert_ok!(
        ending
            .command_tx
            .send(MatchCommand::Leave {
                player_id: first_player,
                reason: "quit".into(),
            })
            .await
    );
    let closed = timeout(Duration::from_secs(2), async {
        while ending.is_accepting_joins() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_ok!(closed);

    // Still in its grace period, but no longer offered to newcomers
    assert_eq!(registry.active_matches(), 1);
    let fresh = registry.find_or_spawn(&config, None, clock);
    assert_ne!(fresh.id, ending.id);

    let refused = ending
        .join(second_player, "eve".into(), Duration::from_secs(2))
        .await;
    assert_eq!(
        assert_err!(refused),
        JoinFailure::Refused(ErrorCode::MatchEnding)
    );
    assert!(JoinFailure::Refused(ErrorCode::MatchEnding).is_retryable());

    let joined = fresh
        .join(second_player, "eve".into(), Duration::from_secs(2))
        .await;
    match assert_ok!(joined).0 {
        ServerMsg::Joined { match_id, player_id, .. } => {
            assert_eq!(match_id, fresh.id);
            assert_eq!(player_id, second_player);
        }
        other => panic!("unexpected {other:?}"),
    }
}
