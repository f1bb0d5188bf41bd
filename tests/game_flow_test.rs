//! End-to-end game flows through the assembled runtime
//! Timers, pacing and delivery all run on the real background loops.

use std::{sync::Arc, thread, time::Duration};
use survivor_draw::{
    config::{DispatcherConfig, GameConfig, SchedulerConfig},
    dispatcher::ChannelTransport,
    games::{
        draw::prize_seed, CancelReason, EngineParts, FixedPacing, Game, GameEngine, GameEvent,
        GameId, GameState, HashRandomness, NumberRange, VrfRandomness,
    },
    metrics::EngineMetrics,
    LotteryConfig, LotteryFactory, MemoryGameStore, OutboundDispatcher, OutboundMessage,
    Scheduler, TaskKind,
};
use tokio::sync::mpsc::UnboundedReceiver;

async fn wait_for<F>(engine: &GameEngine, game_id: &GameId, done: F) -> Game
where
    F: Fn(&Game) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let game = engine.status(game_id).expect("status");
        if done(&game) {
            return game;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "game stuck in {} at round {}",
            game.state,
            game.round_index
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn collect_until(rx: &mut UnboundedReceiver<OutboundMessage>, prefix: &str) -> Vec<OutboundMessage> {
    let mut received = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("transport open");
        let last = message.body.starts_with(prefix);
        received.push(message);
        if last {
            return received;
        }
    }
}

#[tokio::test]
async fn test_game_runs_from_enrollment_to_finish() {
    let config = LotteryConfig::testing();
    let context = config.randomness.signing_context.clone();
    let (prize_min, prize_max) = (config.game.prize_min, config.game.prize_max);

    let (transport, mut rx) = ChannelTransport::new();
    let runtime = LotteryFactory::create_in_memory(config, Arc::new(transport))
        .await
        .expect("runtime");
    let engine = runtime.engine();

    let game = engine
        .open_enrollment("flow", 10, 2, Duration::from_secs(60))
        .expect("open");
    for i in 0..5 {
        engine
            .enroll(&game.id, &format!("u{}", i), &format!("Player {}", i))
            .expect("enroll");
    }

    assert_eq!(engine.force_start(&game.id).expect("start"), GameState::Drawing);
    let started = engine.status(&game.id).expect("status");
    assert_eq!(started.number_range, Some(NumberRange { min: 1, max: 10 }));

    let finished = wait_for(&engine, &game.id, |g| g.state.is_terminal()).await;
    assert_eq!(finished.state, GameState::Finished);
    assert_eq!(finished.winners.len(), 2);
    for winner in &finished.winners {
        assert!(finished.players[winner].is_active());
    }
    assert_eq!(finished.eliminated_players().count(), 3);

    let prize = finished.prize.clone().expect("prize");
    assert!(prize.distributed);
    assert_eq!(prize.per_survivor_amount, prize.total_amount / 2);
    let verified = VrfRandomness::verify_proof(
        &prize.randomness_proof,
        &context,
        &prize_seed(&game.id),
        prize_min,
        prize_max,
    )
    .expect("proof verifies");
    assert_eq!(verified, prize.total_amount);

    let messages = collect_until(&mut rx, "Game over!").await;
    assert!(messages.iter().all(|m| m.chat_ref == "flow"));
    let position = |prefix: &str| {
        messages
            .iter()
            .position(|m| m.body.starts_with(prefix))
            .unwrap_or_else(|| panic!("no message starting with {:?}", prefix))
    };
    let joined = position("Player 0, Player 1, Player 2, Player 3, and Player 4 joined the game");
    let draw_started = position("Draw started!");
    let game_over = messages.len() - 1;
    assert!(joined < draw_started);
    let rounds: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.body.starts_with("Round "))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(rounds.len(), finished.round_index as usize);
    assert!(rounds.iter().all(|&i| draw_started < i && i < game_over));

    // The chat is free again.
    assert!(engine.open_enrollment("flow", 5, 1, Duration::from_secs(60)).is_ok());
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_start_timer_cancels_underfilled_game() {
    let (transport, mut rx) = ChannelTransport::new();
    let runtime = LotteryFactory::create_in_memory(LotteryConfig::testing(), Arc::new(transport))
        .await
        .expect("runtime");
    let engine = runtime.engine();

    let game = engine
        .open_enrollment("lonely", 5, 1, Duration::from_millis(50))
        .expect("open");
    engine.enroll(&game.id, "u1", "Solo").expect("enroll");

    let cancelled = wait_for(&engine, &game.id, |g| g.state.is_terminal()).await;
    assert_eq!(cancelled.state, GameState::Cancelled);
    assert_eq!(cancelled.cancel_reason, Some(CancelReason::NotEnoughPlayers));
    assert!(runtime.scheduler().pending(&game.id).is_empty());

    let messages = collect_until(&mut rx, "Game cancelled").await;
    assert_eq!(
        messages.last().map(|m| m.body.as_str()),
        Some("Game cancelled: not enough players")
    );

    assert_eq!(engine.status_by_chat("lonely").expect("status").id, game.id);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_force_end_mid_draw_stops_rounds() {
    let mut config = LotteryConfig::testing();
    config.game.first_round_delay_ms = 60_000;

    let (transport, _rx) = ChannelTransport::new();
    let runtime = LotteryFactory::create_in_memory(config, Arc::new(transport))
        .await
        .expect("runtime");
    let engine = runtime.engine();

    let game = engine
        .open_enrollment("abort", 4, 1, Duration::from_secs(60))
        .expect("open");
    for i in 0..4 {
        engine.enroll(&game.id, &format!("u{}", i), &format!("P{}", i)).expect("enroll");
    }
    assert_eq!(engine.status(&game.id).expect("status").state, GameState::Drawing);

    assert_eq!(engine.force_end(&game.id).expect("end"), GameState::Cancelled);
    assert_eq!(engine.force_end(&game.id).expect("end again"), GameState::Cancelled);

    // A stale resume timer is ignored.
    engine.handle_timer(&game.id, TaskKind::ResumeDraw);
    let game = engine.status(&game.id).expect("status");
    assert_eq!(game.cancel_reason, Some(CancelReason::AdminAbort));
    assert_eq!(game.round_index, 0);
    runtime.shutdown().await;
}

#[test]
fn test_concurrent_force_start_starts_once() {
    let metrics = Arc::new(EngineMetrics::new());
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
    let engine = Arc::new(GameEngine::new(
        GameConfig::default(),
        EngineParts {
            store: Arc::new(MemoryGameStore::new()),
            randomness: Arc::new(HashRandomness::new("race")),
            scheduler: scheduler.clone(),
            dispatcher: Arc::new(OutboundDispatcher::new(DispatcherConfig::default(), metrics.clone())),
            pacing: Arc::new(FixedPacing::new(1, Duration::ZERO)),
            metrics: metrics.clone(),
        },
    ));
    let mut events = engine.subscribe();

    let game = engine
        .open_enrollment("race", 10, 1, Duration::from_secs(60))
        .expect("open");
    for i in 0..4 {
        engine.enroll(&game.id, &format!("u{}", i), &format!("P{}", i)).expect("enroll");
    }

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            let game_id = game.id.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    engine.force_start(&game_id).expect("start");
                } else {
                    engine.handle_timer(&game_id, TaskKind::StartGame);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let mut draw_started = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, GameEvent::DrawStarted { .. }) {
            draw_started += 1;
        }
    }
    assert_eq!(draw_started, 1);
    assert_eq!(metrics.snapshot().games_started, 1);

    let pending = scheduler.pending(&game.id);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, TaskKind::ResumeDraw);
}
