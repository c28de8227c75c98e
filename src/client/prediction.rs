//! Client-side prediction of the local player's own inputs

use std::collections::BTreeMap;

use crate::config::{PredictionConfig, SimulationConfig};
use crate::game::board::{Board, CellIndex};
use crate::game::entity::{Entity, EntityId, PlayerId};
use crate::game::input::{InputPayload, InputStats, PlayerInput};
use crate::game::physics::PhysicsSystem;
use crate::game::simulation::{apply_player_input, PlayerState, OUTCOME_IGNORED};
use crate::game::snapshot::{AuthoritativeGameState, GamePhase};

/// Unconfirmed projection of the last authoritative state
#[derive(Debug, Clone, PartialEq)]
pub struct PredictiveGameState {
    /// Snapshot the prediction was built on
    pub base_sequence: u64,
    pub phase: GamePhase,
    pub board: Board,
    pub players: Vec<PlayerState>,
    /// Entities that differ from the base, or were created by prediction
    pub predicted_entities: BTreeMap<EntityId, Entity>,
    pub confidence: f32,
    /// Outcome string per replayed input sequence
    pub outcomes: Vec<(u64, String)>,
}

impl PredictiveGameState {
    pub fn outcome_of(&self, sequence: u64) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|(seq, _)| *seq == sequence)
            .map(|(_, outcome)| outcome.as_str())
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }
}

/// Mirrors the simulation's per-input rules for a single player
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    player_id: PlayerId,
    config: PredictionConfig,
    max_arrows: usize,
}

impl PredictionEngine {
    pub fn new(player_id: PlayerId, config: PredictionConfig, simulation: &SimulationConfig) -> Self {
        Self {
            player_id,
            config,
            max_arrows: simulation.max_arrows_per_player,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// How much to trust a prediction given the link's recent behaviour.
    ///
    /// Never increases with more pending inputs or a higher drop rate.
    pub fn confidence(&self, pending: usize, drop_rate: f32, avg_latency_ms: Option<f32>) -> f32 {
        let c = &self.config;
        let mut confidence = 1.0f32;
        confidence *= (1.0 - c.pending_penalty * pending as f32).max(c.pending_floor);
        confidence *= (1.0 - drop_rate.clamp(0.0, 1.0)).max(c.drop_floor);
        if avg_latency_ms.is_some_and(|latency| latency > c.latency_threshold_ms) {
            confidence *= c.latency_factor;
        }
        confidence.clamp(c.min_confidence, c.max_confidence)
    }

    /// Predict the state after `input`, replaying older pending inputs first
    pub fn predict_from_input(
        &self,
        input: &PlayerInput,
        base: &AuthoritativeGameState,
        pending: &[PlayerInput],
        stats: &InputStats,
    ) -> PredictiveGameState {
        let mut ordered: Vec<&PlayerInput> = pending
            .iter()
            .filter(|p| p.sequence < input.sequence)
            .collect();
        ordered.push(input);
        self.replay(base, &ordered, input.timestamp, stats)
    }

    /// Replay an ordered input list on top of `base`; used after rollback
    pub fn predict_from_inputs(
        &self,
        base: &AuthoritativeGameState,
        inputs: &[PlayerInput],
        stats: &InputStats,
    ) -> PredictiveGameState {
        let ordered: Vec<&PlayerInput> = inputs.iter().collect();
        let target = inputs.last().map_or(base.timestamp, |i| i.timestamp);
        self.replay(base, &ordered, target, stats)
    }

    fn replay(
        &self,
        base: &AuthoritativeGameState,
        inputs: &[&PlayerInput],
        target_ms: u64,
        stats: &InputStats,
    ) -> PredictiveGameState {
        let mut board = base.board.clone();
        let mut players = base.players.clone();
        let mut outcomes = Vec::new();

        if let Some(player) = players.iter_mut().find(|p| p.id == self.player_id) {
            let processed = player.last_processed_sequence;
            for input in inputs.iter().filter(|i| i.sequence > processed) {
                let is_move = matches!(input.payload, InputPayload::Move { .. });
                let outcome = if base.phase != GamePhase::Active && !is_move {
                    OUTCOME_IGNORED.to_string()
                } else {
                    let arrow_id = EntityId::provisional(input.sequence);
                    apply_player_input(&mut board, player, &input.payload, self.max_arrows, arrow_id).0
                };
                outcomes.push((input.sequence, outcome));
            }
        }

        if self.config.extrapolate_entities && base.phase == GamePhase::Active {
            let dt_ms = target_ms
                .saturating_sub(base.timestamp)
                .min(self.config.max_extrapolation_ms);
            if dt_ms > 0 {
                let cells = CellIndex::build(&board);
                let dt_secs = dt_ms as f32 / 1000.0;
                for walker in &mut board.entities {
                    PhysicsSystem::advance(walker, dt_secs, &cells);
                }
            }
        }

        let predicted_entities = board
            .all_entities()
            .filter(|e| base.board.find(e.id) != Some(*e))
            .map(|e| (e.id, e.clone()))
            .collect();

        PredictiveGameState {
            base_sequence: base.sequence,
            phase: base.phase,
            board,
            players,
            predicted_entities,
            confidence: self.confidence(stats.pending, stats.drop_rate, stats.avg_latency_ms),
            outcomes,
        }
    }
}
