//! Game engine: per-game state machine
//!
//! Every command and timer callback takes the engine lock, re-reads the game
//! and acts only if the game is still in the state the action expects. Racing
//! transitions (a start timer firing while an admin forces the start) collapse
//! into one effective transition and a no-op.
//!
//! Nothing in here awaits. Delays between rounds are scheduler tasks, so other
//! games and the dispatcher keep moving while one game waits for its next round.

use crate::{
    config::GameConfig,
    dispatcher::OutboundDispatcher,
    errors::{GameError, LotteryResult, RandomnessError},
    game_store::GameStore,
    games::{
        draw::{assign_numbers, play_round, prize_seed},
        events::{join_bundle_key, GameEvent},
        pacing::PacingPolicy,
        randomness::RandomnessSource,
        registry::GameRegistry,
        types::{CancelReason, Game, GameId, GameState, NumberRange, Player, PlayerId, Prize},
    },
    metrics::EngineMetrics,
    scheduler::{ScheduledTask, Scheduler, TaskKind, TimerHandler},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Minimum roster for a draw to start
pub const MIN_PLAYERS: usize = 2;

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Range, per-player numbers and prize computed before a game enters DRAWING
type PreparedDraw = (NumberRange, BTreeMap<PlayerId, BTreeSet<u32>>, Prize);

#[derive(Default)]
struct EngineInner {
    games: HashMap<GameId, Game>,
    registry: GameRegistry,
}

/// Collaborators the engine drives
pub struct EngineParts {
    pub store: Arc<dyn GameStore>,
    pub randomness: Arc<dyn RandomnessSource>,
    pub scheduler: Arc<Scheduler>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub pacing: Arc<dyn PacingPolicy>,
    pub metrics: Arc<EngineMetrics>,
}

pub struct GameEngine {
    config: GameConfig,
    inner: Mutex<EngineInner>,
    store: Arc<dyn GameStore>,
    randomness: Arc<dyn RandomnessSource>,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<OutboundDispatcher>,
    pacing: Arc<dyn PacingPolicy>,
    metrics: Arc<EngineMetrics>,
    events: broadcast::Sender<GameEvent>,
}

impl GameEngine {
    pub fn new(config: GameConfig, parts: EngineParts) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            inner: Mutex::new(EngineInner::default()),
            store: parts.store,
            randomness: parts.randomness,
            scheduler: parts.scheduler,
            dispatcher: parts.dispatcher,
            pacing: parts.pacing,
            metrics: parts.metrics,
            events,
        }
    }

    fn inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Reload persisted games and re-arm their timers. Elapsed targets fire on the first sweep.
    pub fn restore(&self) -> LotteryResult<usize> {
        let games = self.store.load_all()?;
        let now = Utc::now();

        let mut guard = self.inner();
        let inner = &mut *guard;
        inner.registry = GameRegistry::from_games(games.iter());

        for game in games {
            match game.state {
                GameState::Waiting => {
                    let start_at = game.scheduled_start_at.unwrap_or(now);
                    self.scheduler.arm(&game.id, TaskKind::StartGame, start_at);
                    self.arm_next_countdown(&game.id, start_at, now);
                }
                GameState::Drawing => {
                    let resume_at = game.next_round_at.unwrap_or(now);
                    self.scheduler.arm(&game.id, TaskKind::ResumeDraw, resume_at);
                }
                GameState::Finished | GameState::Cancelled => {}
            }
            tracing::info!(
                game_id = %game.id,
                chat_ref = %game.chat_ref,
                state = %game.state,
                players = game.players.len(),
                "Restored game"
            );
            inner.games.insert(game.id.clone(), game);
        }

        Ok(inner.games.len())
    }

    /// Open a new enrollment window in a chat
    pub fn open_enrollment(
        &self,
        chat_ref: &str,
        max_players: usize,
        survivor_count: usize,
        start_delay: Duration,
    ) -> Result<Game, GameError> {
        self.validate_settings(max_players, survivor_count)?;

        let now = Utc::now();
        let mut game = Game::new(
            chat_ref.to_string(),
            max_players,
            survivor_count,
            self.config.number_range_multiplier,
            now,
        );
        let start_at = after(now, start_delay);
        game.scheduled_start_at = Some(start_at);

        let mut guard = self.inner();
        let inner = &mut *guard;

        if let Err(existing) = inner.registry.bind(chat_ref, &game.id) {
            return Err(GameError::ChatBusy {
                chat_ref: chat_ref.to_string(),
                game_id: existing,
            });
        }

        self.scheduler.arm(&game.id, TaskKind::StartGame, start_at);
        self.arm_next_countdown(&game.id, start_at, now);
        self.persist(&game);
        self.metrics.record_game_opened();

        tracing::info!(
            game_id = %game.id,
            chat_ref = %chat_ref,
            short_code = %game.short_code,
            max_players,
            survivor_count,
            "Enrollment opened"
        );

        self.emit(GameEvent::EnrollmentOpened {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            short_code: game.short_code.clone(),
            max_players,
            survivor_count,
            starts_at: start_at,
        });

        inner.games.insert(game.id.clone(), game.clone());
        Ok(game)
    }

    /// `open_enrollment` with the configured defaults
    pub fn open_default(&self, chat_ref: &str) -> Result<Game, GameError> {
        self.open_enrollment(
            chat_ref,
            self.config.default_max_players,
            self.config.default_survivor_count,
            self.config.default_start_delay(),
        )
    }

    fn validate_settings(&self, max_players: usize, survivor_count: usize) -> Result<(), GameError> {
        if max_players < MIN_PLAYERS || max_players > self.config.max_players_limit {
            return Err(GameError::InvalidSettings(format!(
                "max players must be within {}..={}, got {}",
                MIN_PLAYERS, self.config.max_players_limit, max_players
            )));
        }
        if survivor_count == 0 || survivor_count >= max_players {
            return Err(GameError::InvalidSettings(format!(
                "survivor count must be within 1..{}, got {}",
                max_players, survivor_count
            )));
        }
        if self.config.strict_number_range && self.config.number_range_multiplier < 1.0 {
            return Err(GameError::InvalidSettings(format!(
                "number range multiplier {} can hand out shared numbers",
                self.config.number_range_multiplier
            )));
        }
        Ok(())
    }

    /// Add a player to a WAITING game. Filling the game starts the draw.
    pub fn enroll(&self, game_id: &GameId, player_id: &str, display_name: &str) -> Result<Game, GameError> {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let game = inner
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::UnknownGame(game_id.clone()))?;

        if game.state != GameState::Waiting {
            return Err(GameError::EnrollmentClosed {
                game_id: game_id.clone(),
                state: game.state,
            });
        }
        if game.players.contains_key(player_id) {
            return Err(GameError::AlreadyEnrolled {
                game_id: game_id.clone(),
                player_id: player_id.to_string(),
            });
        }
        if game.is_full() {
            return Err(GameError::GameFull {
                game_id: game_id.clone(),
                max_players: game.max_players,
            });
        }

        let now = Utc::now();
        game.players.insert(
            player_id.to_string(),
            Player::new(player_id.to_string(), display_name.to_string(), now),
        );
        self.persist(game);

        tracing::debug!(
            game_id = %game_id,
            player_id = %player_id,
            enrolled = game.players.len(),
            "Player enrolled"
        );

        self.emit(GameEvent::PlayerJoined {
            game_id: game_id.clone(),
            chat_ref: game.chat_ref.clone(),
            player_id: player_id.to_string(),
            display_name: display_name.to_string(),
            enrolled: game.players.len(),
            max_players: game.max_players,
        });

        if game.is_full() {
            tracing::info!(game_id = %game_id, "Game full; starting early");
            self.begin_draw(game, &mut inner.registry, now);
        }

        Ok(game.clone())
    }

    /// Withdraw a player before the draw starts
    pub fn leave(&self, game_id: &GameId, player_id: &str) -> Result<Game, GameError> {
        let mut guard = self.inner();
        let game = guard
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::UnknownGame(game_id.clone()))?;

        if game.state != GameState::Waiting {
            return Err(GameError::EnrollmentClosed {
                game_id: game_id.clone(),
                state: game.state,
            });
        }
        let Some(player) = game.players.remove(player_id) else {
            return Err(GameError::NotEnrolled {
                game_id: game_id.clone(),
                player_id: player_id.to_string(),
            });
        };
        self.persist(game);

        let event = GameEvent::PlayerLeft {
            game_id: game_id.clone(),
            chat_ref: game.chat_ref.clone(),
            player_id: player.id,
            display_name: player.display_name,
            enrolled: game.players.len(),
        };
        // A join still waiting in its bundle was never announced; drop it instead.
        if self.dispatcher.retract(&join_bundle_key(game_id), player_id) {
            self.publish(event);
        } else {
            self.emit(event);
        }

        Ok(game.clone())
    }

    /// Close enrollment now. No-op unless the game is WAITING; returns the resulting state.
    pub fn force_start(&self, game_id: &GameId) -> Result<GameState, GameError> {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let game = inner
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::UnknownGame(game_id.clone()))?;

        if game.state == GameState::Waiting {
            self.begin_draw(game, &mut inner.registry, Utc::now());
        }
        Ok(game.state)
    }

    /// Abort a game. Idempotent: terminal games are left as they are.
    pub fn force_end(&self, game_id: &GameId) -> Result<GameState, GameError> {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let game = inner
            .games
            .get_mut(game_id)
            .ok_or_else(|| GameError::UnknownGame(game_id.clone()))?;

        if !game.state.is_terminal() {
            self.cancel_game(game, &mut inner.registry, CancelReason::AdminAbort, Utc::now());
        }
        Ok(game.state)
    }

    pub fn status(&self, game_id: &GameId) -> Result<Game, GameError> {
        self.inner()
            .games
            .get(game_id)
            .cloned()
            .ok_or_else(|| GameError::UnknownGame(game_id.clone()))
    }

    /// Live game of the chat, or its most recent retained one
    pub fn status_by_chat(&self, chat_ref: &str) -> Result<Game, GameError> {
        let inner = self.inner();
        if let Some(game) = inner
            .registry
            .live_game(chat_ref)
            .and_then(|id| inner.games.get(id))
        {
            return Ok(game.clone());
        }

        inner
            .games
            .values()
            .filter(|g| g.chat_ref == chat_ref)
            .max_by_key(|g| g.created_at)
            .cloned()
            .ok_or_else(|| GameError::UnknownChat(chat_ref.to_string()))
    }

    pub fn live_game_count(&self) -> usize {
        self.inner().registry.len()
    }

    pub fn game_count(&self) -> usize {
        self.inner().games.len()
    }

    /// Timer entry point: act on the task only if the game still expects it
    pub fn handle_timer(&self, game_id: &GameId, kind: TaskKind) {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let Some(game) = inner.games.get_mut(game_id) else {
            tracing::debug!(game_id = %game_id, kind = ?kind, "Timer for unknown game ignored");
            return;
        };

        let now = Utc::now();
        match (kind, game.state) {
            (TaskKind::StartGame, GameState::Waiting) => {
                self.begin_draw(game, &mut inner.registry, now);
            }
            (TaskKind::CountdownNotice, GameState::Waiting) => {
                self.countdown_notice(game, now);
            }
            (TaskKind::ResumeDraw, GameState::Drawing) => {
                self.run_round(game, &mut inner.registry, now);
            }
            (kind, state) => {
                tracing::debug!(game_id = %game_id, kind = ?kind, state = %state, "Stale timer ignored");
            }
        }
    }

    /// Write every chat's current game to the store; safety net for missed snapshots
    pub fn snapshot_all(&self) -> usize {
        let inner = self.inner();

        // A chat's record belongs to its live game, else its newest retained one.
        let mut current: HashMap<&str, &Game> = HashMap::new();
        for game in inner.games.values() {
            let owns_slot = match current.get(game.chat_ref.as_str()) {
                None => true,
                Some(held) => {
                    let live = inner.registry.live_game(&game.chat_ref) == Some(&game.id);
                    let held_live = inner.registry.live_game(&held.chat_ref) == Some(&held.id);
                    live || (!held_live && game.created_at > held.created_at)
                }
            };
            if owns_slot {
                current.insert(game.chat_ref.as_str(), game);
            }
        }

        let games: Vec<&Game> = current.into_values().collect();
        match self.store.snapshot_batch(&games) {
            Ok(written) => written,
            Err(e) => {
                tracing::error!(games = games.len(), "Failed to write snapshot batch: {}", e);
                0
            }
        }
    }

    /// Drop terminal games whose retention has passed, from memory and from the store
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention())
            .unwrap_or_else(|_| chrono::Duration::zero());

        let mut inner = self.inner();
        let expired: Vec<GameId> = inner
            .games
            .values()
            .filter(|g| g.state.is_terminal())
            .filter(|g| g.ended_at.map_or(true, |ended| ended + retention <= now))
            .map(|g| g.id.clone())
            .collect();

        for game_id in &expired {
            if let Some(game) = inner.games.remove(game_id) {
                if let Err(e) = self.store.remove(&game.chat_ref, &game.id) {
                    tracing::warn!(game_id = %game.id, "Failed to prune stored game: {}", e);
                }
                self.dispatcher.clear(&game.id);
                tracing::debug!(game_id = %game.id, chat_ref = %game.chat_ref, "Pruned game");
            }
        }

        expired.len()
    }

    // ---- transitions; all run with the engine lock held ----

    fn begin_draw(&self, game: &mut Game, registry: &mut GameRegistry, now: DateTime<Utc>) {
        self.scheduler.cancel(&game.id, Some(TaskKind::StartGame));
        self.scheduler.cancel(&game.id, Some(TaskKind::CountdownNotice));

        if game.players.len() < MIN_PLAYERS {
            tracing::info!(
                game_id = %game.id,
                players = game.players.len(),
                "Not enough players; cancelling"
            );
            self.cancel_game(game, registry, CancelReason::NotEnoughPlayers, now);
            return;
        }

        let (range, assignment, prize) = match self.prepare_draw(game) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.metrics.record_round_fault();
                let retry_at = self.scheduler.arm(
                    &game.id,
                    TaskKind::StartGame,
                    after(now, self.config.fault_retry_delay()),
                );
                tracing::error!(
                    game_id = %game.id,
                    retry_at = %retry_at,
                    "Failed to start draw: {}",
                    e
                );
                return;
            }
        };

        game.state = GameState::Drawing;
        game.number_range = Some(range);
        game.number_assignment = assignment;
        game.prize = Some(prize.clone());
        game.started_at = Some(now);
        let first_round_at = after(now, self.config.first_round_delay());
        game.next_round_at = Some(first_round_at);

        self.scheduler.arm(&game.id, TaskKind::ResumeDraw, first_round_at);
        self.persist(game);
        self.metrics.record_game_started();

        tracing::info!(
            game_id = %game.id,
            players = game.players.len(),
            range_max = range.max,
            prize = prize.total_amount,
            "Draw started"
        );

        // Pending join notices go out before the draw announcement.
        self.dispatcher.flush_chat(&game.chat_ref);

        let assignments = game
            .number_assignment
            .iter()
            .map(|(player_id, numbers)| {
                (
                    game.display_name(player_id).to_string(),
                    numbers.iter().copied().collect(),
                )
            })
            .collect();

        self.emit(GameEvent::DrawStarted {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            number_range: range,
            assignments,
            prize_total: prize.total_amount,
            per_survivor: prize.per_survivor_amount,
        });
    }

    fn prepare_draw(&self, game: &Game) -> Result<PreparedDraw, RandomnessError> {
        let range = NumberRange::for_players(game.players.len(), game.number_range_multiplier);
        let player_ids: Vec<PlayerId> = game.players.keys().cloned().collect();
        let assignment = assign_numbers(&game.id, &player_ids, range, self.randomness.as_ref())?;

        let (total, proof) = self.randomness.uniform_with_proof(
            self.config.prize_min,
            self.config.prize_max,
            &prize_seed(&game.id),
        )?;

        Ok((range, assignment, Prize::split(total, game.survivor_count, proof)))
    }

    fn countdown_notice(&self, game: &Game, now: DateTime<Utc>) {
        let Some(start_at) = game.scheduled_start_at else {
            return;
        };
        let remaining_ms = (start_at - now).num_milliseconds();
        if remaining_ms <= 0 {
            return;
        }

        self.emit(GameEvent::CountdownNotice {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            seconds_left: (remaining_ms as u64 + 999) / 1_000,
            enrolled: game.players.len(),
        });
        self.arm_next_countdown(&game.id, start_at, now);
    }

    /// Arm the largest configured lead time that is still ahead of `now`
    fn arm_next_countdown(&self, game_id: &GameId, start_at: DateTime<Utc>, now: DateTime<Utc>) {
        let next = self
            .config
            .countdown_notice_secs
            .iter()
            .map(|&lead| start_at - chrono::Duration::seconds(lead as i64))
            .filter(|at| *at > now)
            .min();

        if let Some(at) = next {
            self.scheduler.arm(game_id, TaskKind::CountdownNotice, at);
        }
    }

    fn run_round(&self, game: &mut Game, registry: &mut GameRegistry, now: DateTime<Utc>) {
        if game.draw_complete() {
            self.finish_game(game, registry, now);
            return;
        }

        let recent = game.recent_eliminations.clone();
        let plan = self
            .pacing
            .plan(game.active_count(), game.survivor_count, &recent);

        // Work on a copy so a failed draw leaves the committed game untouched.
        let mut working = game.clone();
        let draw = match play_round(&mut working, &plan, self.randomness.as_ref()) {
            Ok(draw) => draw,
            Err(e) => {
                self.metrics.record_round_fault();
                let retry_at = after(now, self.config.fault_retry_delay());
                game.next_round_at = Some(retry_at);
                self.scheduler.arm(&game.id, TaskKind::ResumeDraw, retry_at);
                self.persist(game);
                tracing::error!(
                    game_id = %game.id,
                    round = game.round_index + 1,
                    retry_at = %retry_at,
                    "Draw round failed: {}",
                    e
                );
                return;
            }
        };
        *game = working;

        self.metrics.record_round(draw.eliminated.len());
        tracing::info!(
            game_id = %game.id,
            round = draw.round_index,
            drawn = ?draw.numbers_drawn,
            eliminated = draw.eliminated.len(),
            remaining = draw.remaining_active_count,
            "Round played"
        );

        self.emit(GameEvent::RoundResult {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            draw,
        });

        if game.draw_complete() {
            self.finish_game(game, registry, now);
            return;
        }

        let next_at = after(now, plan.inter_round_delay);
        game.next_round_at = Some(next_at);
        self.scheduler.arm(&game.id, TaskKind::ResumeDraw, next_at);
        self.persist(game);
    }

    fn finish_game(&self, game: &mut Game, registry: &mut GameRegistry, now: DateTime<Utc>) {
        game.state = GameState::Finished;
        game.ended_at = Some(now);
        game.next_round_at = None;
        game.winners = game.active_players().map(|p| p.id.clone()).collect();
        if game.winners.is_empty() {
            if let Some(prize) = game.prize.as_mut() {
                prize.distributed = false;
            }
        }

        self.scheduler.cancel(&game.id, None);
        registry.release(&game.chat_ref, &game.id);
        self.persist(game);
        self.metrics.record_game_finished();

        tracing::info!(
            game_id = %game.id,
            rounds = game.round_index,
            winners = game.winners.len(),
            "Game finished"
        );

        let winners = game
            .winners
            .iter()
            .map(|id| (id.clone(), game.display_name(id).to_string()))
            .collect();

        self.emit(GameEvent::GameFinished {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            winners,
            prize: game.prize.clone(),
        });
    }

    fn cancel_game(
        &self,
        game: &mut Game,
        registry: &mut GameRegistry,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) {
        game.state = GameState::Cancelled;
        game.cancel_reason = Some(reason);
        game.ended_at = Some(now);
        game.next_round_at = None;

        self.scheduler.cancel(&game.id, None);
        let dropped = self.dispatcher.clear(&game.id);
        registry.release(&game.chat_ref, &game.id);
        self.persist(game);
        self.metrics.record_game_cancelled();

        tracing::info!(
            game_id = %game.id,
            reason = ?reason,
            dropped_messages = dropped,
            "Game cancelled"
        );

        self.emit(GameEvent::GameCancelled {
            game_id: game.id.clone(),
            chat_ref: game.chat_ref.clone(),
            reason,
        });
    }

    /// Snapshot and log on failure; the periodic `snapshot_all` retries
    fn persist(&self, game: &Game) -> bool {
        match self.store.snapshot(game) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(game_id = %game.id, "Failed to snapshot game: {}", e);
                false
            }
        }
    }

    fn emit(&self, event: GameEvent) {
        self.dispatcher
            .enqueue(event.to_outbound(self.config.join_bundle_window()));
        self.publish(event);
    }

    /// Broadcast only, without a chat announcement
    fn publish(&self, event: GameEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl TimerHandler for GameEngine {
    fn on_timer(&self, task: &ScheduledTask) {
        self.handle_timer(&task.game_id, task.kind);
    }
}
