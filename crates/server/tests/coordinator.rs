use std::sync::Arc;
use std::time::Duration;

use br31_server::adapters::ChannelAdapter;
use br31_server::adapters::DirectAdapter;
use br31_server::adapters::DirectWriter;
use br31_server::arbiter::GameRules;
use br31_server::arbiter::MoveOutcome;
use br31_server::config::CoordinatorConfig;
use br31_server::coordinator::Coordinator;
use br31_server::coordinator::CoordinatorBuilder;
use br31_server::coordinator::RunOutcome;
use similar_asserts::assert_eq;
use tokio::sync::oneshot;

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        publish_interval: Duration::from_millis(10),
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

fn two_player_game(rules: GameRules) -> (Coordinator, DirectWriter) {
    let (adapter, writer) = DirectAdapter::new(16);
    let mut builder = CoordinatorBuilder::new(rules, config());
    builder.register_player(1, None).unwrap();
    builder.register_player(2, None).unwrap();
    builder.add_adapter(ChannelAdapter::Direct(Arc::new(adapter)));
    (builder.build(), writer)
}

async fn run_with_timeout(
    coordinator: &mut Coordinator,
    shutdown: oneshot::Receiver<()>,
) -> RunOutcome {
    let shutdown = async move {
        let _ = shutdown.await;
    };
    tokio::time::timeout(Duration::from_secs(10), coordinator.run_until_terminal(shutdown))
        .await
        .expect("run did not finish")
}

#[test_log::test(tokio::test)]
async fn first_to_reach_the_limit_loses() {
    let (mut coordinator, writer) = two_player_game(GameRules::default());
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    coordinator.start();

    let players = tokio::spawn(async move {
        let mut count = 0;
        for (player, amount) in [(1, 3), (2, 3)].repeat(5) {
            count += amount;
            let outcome = writer.submit(player, amount).await.unwrap();
            assert_eq!(
                outcome,
                MoveOutcome::Applied {
                    new_count: count,
                    applied: amount,
                    ended: false,
                }
            );
        }
        writer.submit(1, 1).await.unwrap()
    });

    let outcome = run_with_timeout(&mut coordinator, shutdown_rx).await;
    assert_eq!(
        players.await.unwrap(),
        MoveOutcome::Applied {
            new_count: 31,
            applied: 1,
            ended: true,
        }
    );
    assert_eq!(
        outcome,
        RunOutcome::Finished {
            loser: 1,
            final_count: 31,
        }
    );
    coordinator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn out_of_turn_and_oversized_moves_are_dropped() {
    let (mut coordinator, writer) = two_player_game(GameRules::default());
    coordinator.start();

    assert_eq!(
        writer.submit(2, 1).await.unwrap(),
        MoveOutcome::RejectedWrongTurn
    );
    assert_eq!(
        writer.submit(1, 5).await.unwrap(),
        MoveOutcome::RejectedInvalidAmount
    );
    let state = coordinator.store().snapshot();
    assert_eq!(state.current_count, 0);
    assert_eq!(state.current_turn, 1);
    assert_eq!(state.version, 2);

    assert!(writer.submit(1, 2).await.unwrap().is_applied());
    assert_eq!(coordinator.store().snapshot().current_turn, 2);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    shutdown_tx.send(()).unwrap();
    run_with_timeout(&mut coordinator, shutdown_rx).await;
    coordinator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn shutdown_mid_game_aborts_without_loser() {
    let (mut coordinator, writer) = two_player_game(GameRules::default());
    coordinator.start();

    for (player, amount) in [(1, 3), (2, 3), (1, 3), (2, 1)] {
        assert!(writer.submit(player, amount).await.unwrap().is_applied());
    }
    assert_eq!(coordinator.store().snapshot().current_count, 10);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    shutdown_tx.send(()).unwrap();
    let outcome = run_with_timeout(&mut coordinator, shutdown_rx).await;
    assert_eq!(outcome, RunOutcome::Aborted { count: 10 });

    let state = coordinator.store().snapshot();
    assert!(state.aborted);
    assert!(!state.game_over);
    assert_eq!(state.last_caller, None);

    // Adapters are stopped and joined before the run returns.
    assert!(writer.submit(1, 1).await.is_err());
    coordinator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn moves_after_the_end_do_not_change_anything() {
    let rules = GameRules {
        limit: 4,
        ..Default::default()
    };
    let (mut coordinator, writer) = two_player_game(rules);
    coordinator.start();

    assert!(writer.submit(1, 3).await.unwrap().is_applied());
    assert_eq!(
        writer.submit(2, 2).await.unwrap(),
        MoveOutcome::Applied {
            new_count: 5,
            applied: 2,
            ended: true,
        }
    );
    let ended = coordinator.store().snapshot();
    for player in [1, 2] {
        // The adapter may already be stopping once the end was observed.
        if let Ok(outcome) = writer.submit(player, 1).await {
            assert_eq!(outcome, MoveOutcome::RejectedGameOver);
        }
    }
    assert_eq!(coordinator.store().snapshot(), ended);

    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    assert_eq!(
        run_with_timeout(&mut coordinator, shutdown_rx).await,
        RunOutcome::Finished {
            loser: 2,
            final_count: 5,
        }
    );
    coordinator.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn three_players_rotate_through_direct_writers() {
    let (adapter, writer) = DirectAdapter::new(16);
    let mut builder = CoordinatorBuilder::new(GameRules::default(), config());
    builder.add_adapter(ChannelAdapter::Direct(Arc::new(adapter)));
    let mut coordinator = builder.build();
    coordinator.start();

    for player in [3, 1, 2] {
        writer.register(player).await.unwrap();
    }
    let mut holders = Vec::new();
    for _ in 0..6 {
        let holder = coordinator.store().snapshot().current_turn;
        holders.push(holder);
        assert!(writer.submit(holder, 2).await.unwrap().is_applied());
    }
    assert_eq!(holders, vec![3, 1, 2, 3, 1, 2]);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    shutdown_tx.send(()).unwrap();
    assert_eq!(
        run_with_timeout(&mut coordinator, shutdown_rx).await,
        RunOutcome::Aborted { count: 12 }
    );
    coordinator.shutdown().await;
}
