//! Per-frame glue between local input, the server stream and the display

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::delta::{self, DeltaError, DeltaState};
use crate::game::entity::PlayerId;
use crate::game::input::{InputPayload, InputRejected, InputSequencer, InputStats, PlayerInput};
use crate::game::simulation::OUTCOME_IGNORED;
use crate::game::snapshot::AuthoritativeGameState;
use crate::ws::protocol::{ClientMsg, ErrorCode, FinalScore, PredictionMeta, ServerMsg};

use super::interpolation::{scaled_duration, DisplayState, Easing, InterpolationService};
use super::prediction::{PredictionEngine, PredictiveGameState};
use super::rollback::{RollbackManager, RollbackOutcome};

/// Weight of a new sample in the server clock offset average
const CLOCK_OFFSET_ALPHA: f64 = 0.2;

/// Client half of a game: sequences and predicts local input, folds in
/// server updates and hands the renderer one state per frame
pub struct ClientSession {
    player_id: PlayerId,
    config: GameConfig,
    sequencer: InputSequencer,
    engine: PredictionEngine,
    interpolation: InterpolationService,
    rollback: RollbackManager,
    authoritative: Option<AuthoritativeGameState>,
    prediction: Option<PredictiveGameState>,
    /// Predicted inputs the latest snapshot does not reflect yet. Outlives
    /// acknowledgment, since an ack can arrive before the state showing it.
    replay_log: Vec<PlayerInput>,
    prediction_enabled: bool,
    /// Server time minus local time
    clock_offset_ms: Option<f64>,
    match_id: Option<Uuid>,
    seed: Option<u64>,
    final_scores: Option<Vec<FinalScore>>,
    last_error: Option<(ErrorCode, String)>,
}

impl ClientSession {
    pub fn new(player_id: PlayerId, config: GameConfig) -> Self {
        let mut sequencer = InputSequencer::new(config.input.clone());
        sequencer.register(player_id);
        let engine = PredictionEngine::new(player_id, config.prediction.clone(), &config.simulation);
        let rollback = RollbackManager::new(config.rollback.clone());

        Self {
            player_id,
            config,
            sequencer,
            engine,
            interpolation: InterpolationService::new(),
            rollback,
            authoritative: None,
            prediction: None,
            replay_log: Vec::new(),
            prediction_enabled: true,
            clock_offset_ms: None,
            match_id: None,
            seed: None,
            final_scores: None,
            last_error: None,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn match_id(&self) -> Option<Uuid> {
        self.match_id
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn authoritative(&self) -> Option<&AuthoritativeGameState> {
        self.authoritative.as_ref()
    }

    pub fn prediction(&self) -> Option<&PredictiveGameState> {
        self.prediction.as_ref()
    }

    pub fn rollback(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn final_scores(&self) -> Option<&[FinalScore]> {
        self.final_scores.as_deref()
    }

    pub fn last_error(&self) -> Option<&(ErrorCode, String)> {
        self.last_error.as_ref()
    }

    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.map_or(0, |o| o.round() as i64)
    }

    pub fn input_stats(&self) -> InputStats {
        self.sequencer.stats(&self.player_id).unwrap_or_default()
    }

    pub fn pending_inputs(&self) -> usize {
        self.input_stats().pending
    }

    pub fn prediction_enabled(&self) -> bool {
        self.prediction_enabled
    }

    /// Turning prediction off drops every pending input at once; the display
    /// falls back to the last authoritative state
    pub fn set_prediction_enabled(&mut self, enabled: bool) {
        if self.prediction_enabled == enabled {
            return;
        }
        self.prediction_enabled = enabled;
        if !enabled {
            self.sequencer.clear_pending(&self.player_id);
            self.replay_log.clear();
            self.prediction = None;
            if let Some(state) = &self.authoritative {
                self.interpolation.snap(DisplayState::from_authoritative(state));
            }
        }
        debug!(player_id = %self.player_id, enabled, "Prediction toggled");
    }

    /// Current trust in the displayed prediction
    pub fn confidence(&self) -> f32 {
        match &self.prediction {
            Some(prediction) => prediction.confidence,
            None => {
                let stats = self.input_stats();
                self.engine
                    .confidence(stats.pending, stats.drop_rate, stats.avg_latency_ms)
            }
        }
    }

    /// Handle a local input event. Returns the message to send, or `None` when
    /// the local rate limit swallowed it.
    pub fn local_input(&mut self, payload: InputPayload, now_ms: u64) -> Option<ClientMsg> {
        let base = match &self.authoritative {
            Some(base) if self.prediction_enabled => base,
            // Without a baseline the server assigns the sequence
            _ => return Some(raw_message(payload)),
        };

        let input = match self.sequencer.accept(self.player_id, payload, now_ms) {
            Ok(input) => input,
            Err(InputRejected::RateLimitExceeded) => {
                debug!(player_id = %self.player_id, "Local input over rate limit");
                return None;
            }
            Err(err) => {
                warn!(player_id = %self.player_id, error = %err, "Local input rejected");
                return None;
            }
        };

        let stats = self.input_stats();
        let predicted = self
            .engine
            .predict_from_input(&input, base, &self.replay_log, &stats);
        let expected_outcome = predicted
            .outcome_of(input.sequence)
            .unwrap_or(OUTCOME_IGNORED)
            .to_string();

        let from = self
            .interpolation
            .current()
            .cloned()
            .unwrap_or_else(|| DisplayState::from_authoritative(base));
        self.interpolation.start(
            from,
            DisplayState::from_predictive(&predicted),
            now_ms,
            self.config.rollback.min_frame_ms,
            Easing::Linear,
        );
        self.prediction = Some(predicted);
        self.replay_log.push(input.clone());

        let prediction = PredictionMeta {
            id: format!("{}-{}", self.player_id.simple(), input.sequence),
            expected_outcome,
        };
        Some(ClientMsg::PredictiveInput { input, prediction })
    }

    /// Fold in one server message; returns anything that must be sent back
    pub fn on_server_message(&mut self, msg: ServerMsg, now_ms: u64) -> Vec<ClientMsg> {
        match msg {
            ServerMsg::Welcome { server_time, .. } => {
                self.sample_clock(server_time, now_ms);
            }
            ServerMsg::Joined { match_id, seed, .. } => {
                self.match_id = Some(match_id);
                self.seed = Some(seed);
                self.authoritative = None;
                self.final_scores = None;
            }
            ServerMsg::State { state } => {
                self.sample_clock(state.timestamp, now_ms);
                self.accept_state(*state, now_ms);
            }
            ServerMsg::Delta { delta } => {
                self.sample_clock(delta.timestamp, now_ms);
                if let Err(err) = self.apply_delta(&delta, now_ms) {
                    warn!(player_id = %self.player_id, error = %err, "Delta rejected, requesting resync");
                    return vec![ClientMsg::Resync];
                }
            }
            ServerMsg::InputAcknowledgment {
                player_id,
                acknowledged_sequence,
                ..
            } if player_id == self.player_id => {
                self.sequencer
                    .acknowledge(&self.player_id, acknowledged_sequence, now_ms);
            }
            ServerMsg::RollbackCorrection { correction } => {
                self.rollback.record_server_correction(correction);
            }
            ServerMsg::GameOver { scores } => {
                self.final_scores = Some(scores);
            }
            ServerMsg::Error { code, message } => {
                warn!(player_id = %self.player_id, ?code, %message, "Server error");
                self.last_error = Some((code, message));
            }
            ServerMsg::Pong { t, server_time } => {
                let rtt = now_ms.saturating_sub(t);
                self.sample_clock(server_time + rtt / 2, now_ms);
            }
            _ => {}
        }
        Vec::new()
    }

    fn apply_delta(&mut self, delta: &DeltaState, now_ms: u64) -> Result<(), DeltaError> {
        let previous = self.authoritative.as_ref().ok_or(DeltaError::NoBaseline)?;
        let state = delta::apply(previous, delta)?;
        if !state.verify() {
            // Reconstruction drifted from what the server hashed
            self.authoritative = None;
            return Err(DeltaError::NoBaseline);
        }
        self.accept_state(state, now_ms);
        Ok(())
    }

    fn accept_state(&mut self, state: AuthoritativeGameState, now_ms: u64) {
        if let Some(me) = state.player(&self.player_id) {
            let processed = me.last_processed_sequence;
            self.sequencer.fast_forward(&self.player_id, processed);
            self.sequencer.acknowledge(&self.player_id, processed, now_ms);
            self.replay_log.retain(|i| i.sequence > processed);
        }

        let target = DisplayState::from_authoritative(&state);
        let displayed = self.interpolation.current().cloned();

        match displayed {
            None => self.interpolation.snap(target),
            Some(displayed) if self.prediction_enabled => {
                let stats = self.input_stats();
                let (outcome, replayed) = self.rollback.reconcile(
                    self.prediction.as_ref(),
                    &displayed,
                    &state,
                    &self.replay_log,
                    &self.engine,
                    &stats,
                    &mut self.interpolation,
                    now_ms,
                );
                if let RollbackOutcome::Smoothed(event) = &outcome {
                    debug!(
                        player_id = %self.player_id,
                        event = event.id,
                        duration_ms = event.smoothing_duration_ms,
                        "Correction in progress"
                    );
                }
                self.prediction = Some(replayed);
            }
            Some(displayed) => {
                let rollback = &self.config.rollback;
                let duration = scaled_duration(
                    displayed.max_displacement(&target),
                    rollback.ms_per_px,
                    rollback.min_frame_ms,
                    rollback.max_smoothing_ms,
                );
                self.interpolation
                    .start(displayed, target, now_ms, duration, Easing::EaseOut);
            }
        }

        self.authoritative = Some(state);
    }

    fn sample_clock(&mut self, server_ms: u64, local_ms: u64) {
        let sample = server_ms as f64 - local_ms as f64;
        let offset = match self.clock_offset_ms {
            Some(current) => current + CLOCK_OFFSET_ALPHA * (sample - current),
            None => sample,
        };
        self.clock_offset_ms = Some(offset);
        self.sequencer.set_clock_offset(offset.round() as i64);
    }

    /// Per display frame: expire unacknowledged inputs and return what to draw
    pub fn frame(&mut self, now_ms: u64) -> Option<&DisplayState> {
        for expired in self.sequencer.expire(now_ms) {
            debug!(
                player_id = %expired.player_id,
                sequence = expired.sequence,
                "Input acknowledgment timed out"
            );
            self.replay_log.retain(|i| i.sequence != expired.sequence);
        }
        self.interpolation.update(now_ms)
    }
}

fn raw_message(payload: InputPayload) -> ClientMsg {
    match payload {
        InputPayload::Move { x, y } => ClientMsg::Move { x, y },
        InputPayload::ArrowPlace { direction } => ClientMsg::ArrowPlace { direction },
        InputPayload::Action { action } => ClientMsg::Action { action },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::delta::DeltaCompressor;
    use crate::game::delta::StateUpdate;
    use crate::game::entity::Direction;
    use crate::game::simulation::Simulation;
    use crate::game::snapshot::SnapshotBuilder;

    fn me() -> PlayerId {
        Uuid::from_u128(1)
    }

    fn server() -> (Simulation, SnapshotBuilder) {
        let mut sim = Simulation::new(GameConfig::default().simulation, 3, 0);
        sim.add_player(me(), "me".into()).unwrap();
        sim.tick(0);
        (sim, SnapshotBuilder::new())
    }

    fn state_msg(state: AuthoritativeGameState) -> ServerMsg {
        ServerMsg::State {
            state: Box::new(state),
        }
    }

    #[test]
    fn raw_input_before_first_state() {
        let mut session = ClientSession::new(me(), GameConfig::default());
        let msg = session.local_input(InputPayload::Move { x: 1.0, y: 2.0 }, 0);
        assert_eq!(msg, Some(ClientMsg::Move { x: 1.0, y: 2.0 }));
        assert_eq!(session.pending_inputs(), 0);
    }

    #[test]
    fn predictive_input_carries_expected_outcome() {
        let (sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(state_msg(builder.build(&sim, 0)), 0);

        let msg = session
            .local_input(InputPayload::Move { x: 100.4, y: 50.0 }, 5)
            .unwrap();
        match msg {
            ClientMsg::PredictiveInput { input, prediction } => {
                assert_eq!(input.sequence, 1);
                assert_eq!(prediction.expected_outcome, "cursor:100,50");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.pending_inputs(), 1);

        let shown = session.frame(21).unwrap();
        assert_eq!(shown.player(&me()).unwrap().cursor.x, 100.4);
    }

    #[test]
    fn acknowledgment_releases_pending() {
        let (sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(state_msg(builder.build(&sim, 0)), 0);
        session.local_input(InputPayload::Move { x: 1.0, y: 1.0 }, 0);
        session.local_input(InputPayload::ArrowPlace { direction: Direction::Up }, 1);
        assert_eq!(session.pending_inputs(), 2);

        session.on_server_message(
            ServerMsg::InputAcknowledgment {
                player_id: me(),
                acknowledged_sequence: 2,
                processing_time: 1,
            },
            10,
        );
        assert_eq!(session.pending_inputs(), 0);
        assert_eq!(session.input_stats().acked_total, 2);
    }

    #[test]
    fn unacknowledged_inputs_time_out() {
        let (sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(state_msg(builder.build(&sim, 0)), 0);
        session.local_input(InputPayload::Move { x: 1.0, y: 1.0 }, 0);
        session.frame(999);
        assert_eq!(session.pending_inputs(), 1);
        session.frame(1_000);
        assert_eq!(session.pending_inputs(), 0);
        assert_eq!(session.input_stats().dropped_total, 1);
    }

    #[test]
    fn disabling_prediction_clears_pending() {
        let (sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(state_msg(builder.build(&sim, 0)), 0);
        session.local_input(InputPayload::Move { x: 1.0, y: 1.0 }, 0);
        session.set_prediction_enabled(false);
        assert_eq!(session.pending_inputs(), 0);
        assert!(session.prediction().is_none());
        assert_eq!(
            session.local_input(InputPayload::Move { x: 2.0, y: 2.0 }, 5),
            Some(ClientMsg::Move { x: 2.0, y: 2.0 })
        );
    }

    #[test]
    fn deltas_apply_and_mismatch_requests_resync() {
        let (mut sim, mut builder) = server();
        let mut compressor = DeltaCompressor::new(GameConfig::default().delta);
        let mut session = ClientSession::new(me(), GameConfig::default());

        let full = compressor.encode(builder.build(&sim, 0));
        assert!(matches!(full, StateUpdate::Full(_)));
        session.on_server_message(full.into(), 0);

        sim.tick(33);
        let second = builder.build(&sim, 33);
        let expected = second.clone();
        let delta = compressor.encode(second);
        assert!(matches!(delta, StateUpdate::Delta(_)));
        assert!(session.on_server_message(delta.into(), 33).is_empty());
        assert_eq!(session.authoritative(), Some(&expected));

        // Skip one send so the next delta's base is unknown
        sim.tick(66);
        compressor.encode(builder.build(&sim, 66));
        sim.tick(99);
        let gap = compressor.encode(builder.build(&sim, 99));
        assert_eq!(session.on_server_message(gap.into(), 99), vec![ClientMsg::Resync]);
    }

    #[test]
    fn delta_without_baseline_requests_resync() {
        let (mut sim, mut builder) = server();
        let mut compressor = DeltaCompressor::new(GameConfig::default().delta);
        compressor.encode(builder.build(&sim, 0));
        sim.tick(33);
        let delta = compressor.encode(builder.build(&sim, 33));

        let mut session = ClientSession::new(me(), GameConfig::default());
        assert_eq!(session.on_server_message(delta.into(), 33), vec![ClientMsg::Resync]);
    }

    #[test]
    fn moving_walkers_alone_never_count_as_divergence() {
        let (mut sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());

        let mut now = 0;
        let mut walkers_moved = false;
        let mut previous = builder.build(&sim, now);
        session.on_server_message(state_msg(previous.clone()), now);
        for _ in 0..30 {
            now += 40;
            sim.tick(now);
            let state = builder.build(&sim, now);
            walkers_moved |= state
                .board
                .entities
                .iter()
                .any(|e| previous.board.find(e.id).is_some_and(|p| p.position.distance(e.position) > 2.0));
            previous = state.clone();
            session.on_server_message(state_msg(state), now);
            session.frame(now + 20);
        }

        assert!(walkers_moved);
        let stats = session.rollback().stats();
        assert_eq!(stats.detected, 0);
        assert_eq!(stats.smoothed, 0);
        assert_eq!(session.rollback().history().count(), 0);
        assert_eq!(
            session.frame(now + 100),
            Some(&DisplayState::from_authoritative(&previous))
        );
    }

    #[test]
    fn mispredicted_cursor_is_corrected() {
        let (mut sim, mut builder) = server();
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(state_msg(builder.build(&sim, 0)), 0);
        session.local_input(InputPayload::Move { x: 300.0, y: 200.0 }, 5);

        // The server saw a different position for the same sequence
        let input = PlayerInput {
            player_id: me(),
            sequence: 1,
            timestamp: 5,
            input_type: crate::game::input::InputType::Move,
            payload: InputPayload::Move { x: 100.0, y: 200.0 },
            acknowledged: false,
            ack_timeout_ms: 1_000,
        };
        sim.apply_input(&input).unwrap();
        sim.tick(40);
        session.on_server_message(state_msg(builder.build(&sim, 40)), 40);

        let stats = session.rollback().stats();
        assert_eq!(stats.detected, 1);
        assert_eq!(stats.smoothed, 1);
        let event = session.rollback().history().next().unwrap();
        assert_eq!(event.player_corrections[0].player_id, me());
        assert!((event.max_magnitude() - 200.0).abs() < 1e-3);
    }

    #[test]
    fn clock_offset_averages_samples() {
        let mut session = ClientSession::new(me(), GameConfig::default());
        session.on_server_message(
            ServerMsg::Welcome {
                player_id: me(),
                server_time: 10_000,
            },
            1_000,
        );
        assert_eq!(session.clock_offset_ms(), 9_000);
        session.on_server_message(
            ServerMsg::Pong {
                t: 2_000,
                server_time: 11_100,
            },
            2_200,
        );
        // sample = 11_100 + 100 - 2_200 = 9_000
        assert_eq!(session.clock_offset_ms(), 9_000);
    }
}
