//! Match state and authoritative tick loop
//!
//! `MatchCore` holds all per-game state and runs to completion on every call,
//! with time passed in. `GameMatch` is the tokio task that feeds it commands
//! and wakes it when the scheduler or the batcher says so.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::scores::ScoreRepository;
use crate::util::time::Clock;
use crate::ws::protocol::{
    ClientMsg, CorrectionNotice, ErrorCode, FinalScore, Outbound, PlayerInfo, PredictionMeta,
    ServerMsg,
};

use super::delta::DeltaCompressor;
use super::entity::PlayerId;
use super::input::{InputPayload, InputRejected, InputSequencer, PlayerInput};
use super::scheduler::{BroadcastBatcher, TickScheduler};
use super::simulation::{JoinError, PlayerState, Simulation};
use super::snapshot::{GamePhase, SnapshotBuilder};

/// Commands delivered to a match task
#[derive(Debug, Clone)]
pub enum MatchCommand {
    Join {
        player_id: PlayerId,
        display_name: String,
    },
    Leave {
        player_id: PlayerId,
        reason: String,
    },
    Client {
        player_id: PlayerId,
        msg: ClientMsg,
        /// Server milliseconds at socket receipt
        received_at: u64,
    },
}

fn player_info(p: &PlayerState) -> PlayerInfo {
    PlayerInfo {
        player_id: p.id,
        display_name: p.name.clone(),
        is_bot: p.is_bot,
    }
}

/// Everything one game needs between ticks
pub struct MatchCore {
    id: Uuid,
    config: GameConfig,
    sim: Simulation,
    sequencer: InputSequencer,
    scheduler: TickScheduler,
    batcher: BroadcastBatcher,
    snapshots: SnapshotBuilder,
    compressor: DeltaCompressor,
    scores: Option<Arc<dyn ScoreRepository>>,
    outbox: Vec<Outbound>,
    settled: bool,
}

impl MatchCore {
    pub fn new(
        id: Uuid,
        seed: u64,
        config: GameConfig,
        scores: Option<Arc<dyn ScoreRepository>>,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            sim: Simulation::new(config.simulation.clone(), seed, now_ms),
            sequencer: InputSequencer::new(config.input.clone()),
            scheduler: TickScheduler::new(config.scheduler.clone()),
            batcher: BroadcastBatcher::new(),
            snapshots: SnapshotBuilder::new(),
            compressor: DeltaCompressor::new(config.delta.clone()),
            scores,
            outbox: Vec::new(),
            settled: false,
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn sequencer(&self) -> &InputSequencer {
        &self.sequencer
    }

    pub fn compressor(&self) -> &DeltaCompressor {
        &self.compressor
    }

    pub fn human_count(&self) -> usize {
        self.sim.human_count()
    }

    pub fn is_finished(&self) -> bool {
        self.sim.is_finished()
    }

    /// Take everything queued for sending
    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Earliest time `poll` has work to do
    pub fn next_wakeup(&self, now_ms: u64) -> u64 {
        let tick = self.scheduler.next_due().unwrap_or(now_ms);
        match self.batcher.deadline() {
            Some(flush) => tick.min(flush),
            None => tick,
        }
    }

    fn send(&mut self, out: Outbound, now_ms: u64) {
        let delay = self.compressor.batch_delay_ms();
        if let Some(immediate) = self.batcher.push(out, now_ms, delay) {
            self.outbox.push(immediate);
        }
    }

    fn state_changed(&mut self, now_ms: u64) {
        let delay = self.compressor.batch_delay_ms();
        self.batcher.mark_state_dirty(now_ms, delay);
    }

    pub fn handle(&mut self, command: MatchCommand, now_ms: u64) {
        match command {
            MatchCommand::Join {
                player_id,
                display_name,
            } => self.handle_join(player_id, display_name, now_ms),
            MatchCommand::Leave { player_id, reason } => {
                self.handle_leave(player_id, reason, now_ms)
            }
            MatchCommand::Client {
                player_id,
                msg,
                received_at,
            } => self.handle_client(player_id, msg, received_at, now_ms),
        }
    }

    fn handle_join(&mut self, player_id: PlayerId, display_name: String, now_ms: u64) {
        if let Err(e) = self.sim.add_player(player_id, display_name) {
            let code = match e {
                JoinError::MatchFull => ErrorCode::MatchFull,
                JoinError::MatchEnding => ErrorCode::MatchEnding,
            };
            self.send(Outbound::to(player_id, ServerMsg::error(code, e.to_string())), now_ms);
            return;
        }
        self.sequencer.register(player_id);
        // The newcomer has no baseline
        self.compressor.reset();

        let players: Vec<PlayerInfo> = self.sim.players().values().map(player_info).collect();
        self.send(
            Outbound::to(
                player_id,
                ServerMsg::Joined {
                    match_id: self.id,
                    seed: self.sim.seed(),
                    player_id,
                    players,
                },
            ),
            now_ms,
        );
        if let Some(player) = self.sim.player(&player_id).map(player_info) {
            self.send(Outbound::all(ServerMsg::PlayerJoined { player }), now_ms);
        }
        self.state_changed(now_ms);

        info!(
            match_id = %self.id,
            player_id = %player_id,
            player_count = self.sim.players().len(),
            "Player joined match"
        );
    }

    fn handle_leave(&mut self, player_id: PlayerId, reason: String, now_ms: u64) {
        let Some(removed) = self.sim.remove_player(&player_id) else {
            return;
        };
        // Players still present at the end are recorded by `settle`
        if !self.settled && !removed.is_bot {
            if let Some(store) = &self.scores {
                store.record_game(removed.id, &removed.name, removed.score);
            }
        }
        self.sequencer.remove(&player_id);
        self.send(Outbound::all(ServerMsg::PlayerLeft { player_id, reason }), now_ms);
        self.state_changed(now_ms);
        info!(match_id = %self.id, player_id = %player_id, "Player left match");
    }

    fn handle_client(&mut self, player_id: PlayerId, msg: ClientMsg, received_at: u64, now_ms: u64) {
        match msg {
            ClientMsg::Move { x, y } => {
                self.handle_raw(player_id, InputPayload::Move { x, y }, received_at, now_ms)
            }
            ClientMsg::ArrowPlace { direction } => self.handle_raw(
                player_id,
                InputPayload::ArrowPlace { direction },
                received_at,
                now_ms,
            ),
            ClientMsg::Action { action } => {
                self.handle_raw(player_id, InputPayload::Action { action }, received_at, now_ms)
            }
            ClientMsg::PredictiveInput { input, prediction } => {
                self.handle_predictive(player_id, input, prediction, received_at, now_ms)
            }
            ClientMsg::Resync => {
                debug!(match_id = %self.id, player_id = %player_id, "Resync requested");
                self.compressor.reset();
                self.state_changed(now_ms);
            }
            ClientMsg::Ping { t } => {
                self.send(
                    Outbound::to(player_id, ServerMsg::Pong { t, server_time: now_ms }),
                    now_ms,
                );
            }
            ClientMsg::Quit => self.handle_leave(player_id, "quit".to_string(), now_ms),
        }
    }

    fn reject(&mut self, player_id: PlayerId, err: InputRejected, now_ms: u64) {
        match err {
            InputRejected::RateLimitExceeded => {
                debug!(match_id = %self.id, player_id = %player_id, "Input rate limited");
            }
            other => {
                debug!(match_id = %self.id, player_id = %player_id, error = %other, "Input rejected");
                self.send(
                    Outbound::to(player_id, ServerMsg::error(other.code(), other.to_string())),
                    now_ms,
                );
            }
        }
    }

    /// Apply an accepted input and acknowledge it; returns the outcome
    fn apply_and_ack(&mut self, input: &PlayerInput, received_at: u64, now_ms: u64) -> Option<String> {
        let outcome = match self.sim.apply_input(input) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reject(input.player_id, e, now_ms);
                return None;
            }
        };
        self.sequencer.acknowledge(&input.player_id, input.sequence, now_ms);
        self.send(
            Outbound::to(
                input.player_id,
                ServerMsg::InputAcknowledgment {
                    player_id: input.player_id,
                    acknowledged_sequence: input.sequence,
                    processing_time: now_ms.saturating_sub(received_at),
                },
            ),
            now_ms,
        );
        self.state_changed(now_ms);
        Some(outcome)
    }

    fn handle_raw(&mut self, player_id: PlayerId, payload: InputPayload, received_at: u64, now_ms: u64) {
        match self.sequencer.accept(player_id, payload, now_ms) {
            Ok(input) => {
                self.apply_and_ack(&input, received_at, now_ms);
            }
            Err(e) => self.reject(player_id, e, now_ms),
        }
    }

    fn handle_predictive(
        &mut self,
        player_id: PlayerId,
        mut input: PlayerInput,
        prediction: PredictionMeta,
        received_at: u64,
        now_ms: u64,
    ) {
        // Inputs can only be submitted for the connection's own player
        if input.player_id != player_id {
            self.reject(player_id, InputRejected::InvalidPlayerId(input.player_id), now_ms);
            return;
        }
        input.timestamp = input.timestamp.min(now_ms);
        let input = match self.sequencer.accept_sequenced(input, now_ms) {
            Ok(input) => input,
            Err(e) => return self.reject(player_id, e, now_ms),
        };
        let Some(actual) = self.apply_and_ack(&input, received_at, now_ms) else {
            return;
        };

        if actual != prediction.expected_outcome {
            debug!(
                match_id = %self.id,
                player_id = %player_id,
                sequence = input.sequence,
                expected = %prediction.expected_outcome,
                actual = %actual,
                "Misprediction"
            );
            let correction = CorrectionNotice {
                prediction_id: prediction.id,
                input_sequence: input.sequence,
                expected_outcome: prediction.expected_outcome,
                actual_outcome: actual,
                authoritative_sequence: self.snapshots.last_sequence() + 1,
            };
            self.send(
                Outbound::to(player_id, ServerMsg::RollbackCorrection { correction }),
                now_ms,
            );
        }
    }

    /// Run whatever is due at `now_ms`: a tick, a flush, the end of the game
    pub fn poll(&mut self, now_ms: u64) {
        if self.scheduler.due(now_ms) {
            self.run_tick(now_ms);
        }

        if let Some(batch) = self.batcher.flush(now_ms) {
            self.outbox.extend(batch.messages);
            if batch.include_state {
                let state = self.snapshots.build(&self.sim, now_ms);
                let update = self.compressor.encode(state);
                self.outbox.push(Outbound::all(update.into()));
            }
        }

        if self.sim.phase() == GamePhase::Ending && !self.settled {
            self.settle();
        }
    }

    fn run_tick(&mut self, now_ms: u64) {
        let report = self.sim.tick(now_ms);
        if let Some(phase) = report.phase_change {
            info!(match_id = %self.id, phase = ?phase, "Match phase changed");
        }
        if let Some(strategy) = report.rotated_to {
            info!(match_id = %self.id, round = self.sim.round(), strategy = ?strategy, "Strategy rotated");
        }
        if !report.absorbed.is_empty() || !report.eaten.is_empty() {
            debug!(
                match_id = %self.id,
                tick = report.tick,
                absorbed = report.absorbed.len(),
                eaten = report.eaten.len(),
                "Tick events"
            );
        }

        for expired in self.sequencer.expire(now_ms) {
            debug!(
                match_id = %self.id,
                player_id = %expired.player_id,
                sequence = expired.sequence,
                code = ?ErrorCode::PredictionTimeout,
                "Input dropped"
            );
        }

        if self.sim.phase() != GamePhase::Waiting || report.phase_change.is_some() {
            self.state_changed(now_ms);
        }
        self.scheduler.schedule_next(
            now_ms,
            self.sim.players().len(),
            self.sim.board().entity_count(),
        );
    }

    /// Persist scores and announce the result, once
    fn settle(&mut self) {
        self.settled = true;
        let mut scores: Vec<FinalScore> = self
            .sim
            .players()
            .values()
            .map(|p| FinalScore {
                player_id: p.id,
                display_name: p.name.clone(),
                score: p.score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.player_id.cmp(&b.player_id)));

        if let Some(store) = &self.scores {
            for player in self.sim.players().values().filter(|p| !p.is_bot) {
                store.record_game(player.id, &player.name, player.score);
            }
        }
        info!(match_id = %self.id, players = scores.len(), "Match ending");
        self.outbox.push(Outbound::all(ServerMsg::GameOver { scores }));
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub player_count: Arc<AtomicUsize>,
    /// Cleared once the match starts ending; it never reopens
    pub accepting_joins: Arc<AtomicBool>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_accepting_joins(&self) -> bool {
        self.accepting_joins.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }

    /// Send a join and wait for the match's answer.
    ///
    /// The receiver is subscribed before the join goes out and comes back
    /// positioned just past the `Joined` reply.
    pub async fn join(
        &self,
        player_id: PlayerId,
        display_name: String,
        wait: Duration,
    ) -> Result<(ServerMsg, broadcast::Receiver<Outbound>), JoinFailure> {
        let mut rx = self.subscribe();
        self.command_tx
            .send(MatchCommand::Join {
                player_id,
                display_name,
            })
            .await
            .map_err(|_| JoinFailure::Closed)?;

        let reply = tokio::time::timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok(out) if out.to == Some(player_id) => match out.msg {
                        ServerMsg::Joined { .. } => return Ok(out.msg),
                        ServerMsg::Error { code, .. } => return Err(JoinFailure::Refused(code)),
                        _ => continue,
                    },
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(JoinFailure::Closed),
                }
            }
        })
        .await
        .map_err(|_| JoinFailure::TimedOut)??;

        Ok((reply, rx))
    }
}

/// Why a join through a [`MatchHandle`] did not land
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinFailure {
    #[error("match closed")]
    Closed,

    #[error("join refused with {0:?}")]
    Refused(ErrorCode),

    #[error("no answer to join")]
    TimedOut,
}

impl JoinFailure {
    /// Worth trying another match
    pub fn is_retryable(&self) -> bool {
        match self {
            JoinFailure::Closed | JoinFailure::TimedOut => true,
            JoinFailure::Refused(code) => matches!(code, ErrorCode::MatchEnding | ErrorCode::MatchFull),
        }
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Find a match with available slots that is not winding down
    pub fn find_available_match(&self, max_players: usize) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| {
                let handle = entry.value();
                handle.is_accepting_joins() && handle.player_count() < max_players
            })
            .map(|entry| entry.value().clone())
    }

    /// Join an open match or start a new one
    pub fn find_or_spawn(
        self: &Arc<Self>,
        config: &GameConfig,
        scores: Option<Arc<dyn ScoreRepository>>,
        clock: Arc<dyn Clock>,
    ) -> MatchHandle {
        if let Some(handle) = self.find_available_match(config.simulation.seat_limit()) {
            return handle;
        }

        let (game_match, handle) = GameMatch::new(
            Uuid::new_v4(),
            rand::random(),
            config.clone(),
            scores,
            clock,
        );
        self.insert(handle.clone());

        let registry = Arc::clone(self);
        let id = handle.id;
        tokio::spawn(async move {
            game_match.run().await;
            registry.remove(&id);
        });
        handle
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match task
pub struct GameMatch {
    core: MatchCore,
    command_rx: mpsc::Receiver<MatchCommand>,
    outbound_tx: broadcast::Sender<Outbound>,
    player_count: Arc<AtomicUsize>,
    accepting_joins: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl GameMatch {
    /// Create a new match
    pub fn new(
        id: Uuid,
        seed: u64,
        config: GameConfig,
        scores: Option<Arc<dyn ScoreRepository>>,
        clock: Arc<dyn Clock>,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(config.connection.outbound_buffer.max(1));
        let player_count = Arc::new(AtomicUsize::new(0));
        let accepting_joins = Arc::new(AtomicBool::new(true));

        let handle = MatchHandle {
            id,
            command_tx,
            outbound_tx: outbound_tx.clone(),
            player_count: player_count.clone(),
            accepting_joins: accepting_joins.clone(),
        };

        let core = MatchCore::new(id, seed, config, scores, clock.now_millis());
        let game_match = Self {
            core,
            command_rx,
            outbound_tx,
            player_count,
            accepting_joins,
            clock,
        };

        (game_match, handle)
    }

    fn publish(&mut self) {
        // Flags first, so a refused joiner never finds this match open again
        self.player_count
            .store(self.core.human_count(), Ordering::Relaxed);
        if self.core.simulation().phase() == GamePhase::Ending || self.core.is_finished() {
            self.accepting_joins.store(false, Ordering::Relaxed);
        }
        for out in self.core.drain() {
            // No subscribers is not an error; everyone may have left
            let _ = self.outbound_tx.send(out);
        }
    }

    /// Run the authoritative loop until the game finishes
    pub async fn run(mut self) {
        info!(match_id = %self.core.id(), seed = self.core.simulation().seed(), "Match started");

        loop {
            let now = self.clock.now_millis();
            self.core.poll(now);
            self.publish();

            if self.core.is_finished() {
                break;
            }

            let wait = self.core.next_wakeup(now).saturating_sub(now).max(1);
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        let now = self.clock.now_millis();
                        self.core.handle(command, now);
                        // Drain whatever else is queued before the next poll
                        while let Ok(command) = self.command_rx.try_recv() {
                            self.core.handle(command, now);
                        }
                    }
                    None => {
                        warn!(match_id = %self.core.id(), "Command channel closed");
                        break;
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
            }
        }

        self.publish();
        info!(match_id = %self.core.id(), "Match ended");
    }
}
