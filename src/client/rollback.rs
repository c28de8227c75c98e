//! Divergence detection and correction of the client's predicted view
//!
//! When an authoritative state arrives, the manager rebuilds the prediction
//! from it plus the still-unacknowledged inputs and compares that against
//! what the previous prediction claimed for the local player. Small
//! corrections snap; larger ones ease in over a short, distance-scaled window.

use std::collections::VecDeque;
use tracing::{debug, info};

use crate::config::RollbackConfig;
use crate::game::entity::{EntityId, PlayerId, Position};
use crate::game::input::{InputStats, PlayerInput};
use crate::game::snapshot::AuthoritativeGameState;
use crate::ws::protocol::{CorrectionNotice, ErrorCode};

use super::interpolation::{scaled_duration, DisplayState, Easing, InterpolationService};
use super::prediction::{PredictionEngine, PredictiveGameState};

/// How far one entity was off
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCorrection {
    pub entity_id: EntityId,
    pub predicted: Position,
    pub authoritative: Position,
    pub magnitude: f32,
}

/// How far one player's cursor was off
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerCorrection {
    pub player_id: PlayerId,
    pub predicted: Position,
    pub authoritative: Position,
    pub magnitude: f32,
}

/// A detected divergence and how it was resolved
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackEvent {
    pub id: u64,
    /// Authoritative snapshot the correction targets
    pub base_sequence: u64,
    pub entity_corrections: Vec<EntityCorrection>,
    pub player_corrections: Vec<PlayerCorrection>,
    /// Input sequences replayed on top of the snapshot
    pub input_replay: Vec<u64>,
    pub smoothing_duration_ms: u64,
    pub snapped: bool,
    pub at_ms: u64,
}

impl RollbackEvent {
    pub fn max_magnitude(&self) -> f32 {
        self.entity_corrections
            .iter()
            .map(|c| c.magnitude)
            .chain(self.player_corrections.iter().map(|c| c.magnitude))
            .fold(0.0, f32::max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// Display already matched within the threshold
    InSync,
    Snapped(RollbackEvent),
    Smoothed(RollbackEvent),
}

impl RollbackOutcome {
    pub fn event(&self) -> Option<&RollbackEvent> {
        match self {
            RollbackOutcome::InSync => None,
            RollbackOutcome::Snapped(ev) | RollbackOutcome::Smoothed(ev) => Some(ev),
        }
    }
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStats {
    pub reconciled: u64,
    pub detected: u64,
    pub snapped: u64,
    pub smoothed: u64,
    /// Mispredictions the server reported on its own
    pub server_reported: u64,
}

pub struct RollbackManager {
    config: RollbackConfig,
    history: VecDeque<RollbackEvent>,
    server_corrections: VecDeque<CorrectionNotice>,
    stats: RollbackStats,
    next_event_id: u64,
}

impl RollbackManager {
    pub fn new(config: RollbackConfig) -> Self {
        let cap = config.history_cap;
        Self {
            config,
            history: VecDeque::with_capacity(cap),
            server_corrections: VecDeque::with_capacity(cap),
            stats: RollbackStats::default(),
            next_event_id: 1,
        }
    }

    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    /// True if any entity or cursor present in both states is further apart
    /// than the divergence threshold
    pub fn detect_prediction_error(&self, predicted: &DisplayState, authoritative: &DisplayState) -> bool {
        let threshold = self.config.divergence_threshold_px;
        let (entities, players) = Self::corrections(predicted, authoritative);
        entities.iter().any(|c| c.magnitude > threshold) || players.iter().any(|c| c.magnitude > threshold)
    }

    /// Per-entity and per-cursor correction vectors. Entities only one side
    /// knows about, such as provisional arrows, are not tracked.
    pub fn corrections(
        predicted: &DisplayState,
        authoritative: &DisplayState,
    ) -> (Vec<EntityCorrection>, Vec<PlayerCorrection>) {
        let entities = predicted
            .board
            .all_entities()
            .filter_map(|p| {
                let a = authoritative.entity(p.id)?;
                let magnitude = p.position.distance(a.position);
                (magnitude > 0.0).then(|| EntityCorrection {
                    entity_id: p.id,
                    predicted: p.position,
                    authoritative: a.position,
                    magnitude,
                })
            })
            .collect();

        let players = predicted
            .players
            .iter()
            .filter_map(|p| {
                let a = authoritative.player(&p.id)?;
                let magnitude = p.cursor.distance(a.cursor);
                (magnitude > 0.0).then(|| PlayerCorrection {
                    player_id: p.id,
                    predicted: p.cursor,
                    authoritative: a.cursor,
                    magnitude,
                })
            })
            .collect();

        (entities, players)
    }

    /// Reconcile the display with a fresh authoritative snapshot.
    ///
    /// Divergence is measured between the previous prediction, restricted to
    /// what local input produced, and the snapshot with the still-pending
    /// inputs replayed on top. Walkers moving between sends is ordinary
    /// motion and only eases the display along. Returns the outcome and the
    /// rebuilt prediction, which becomes the new baseline for later frames.
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile(
        &mut self,
        previous: Option<&PredictiveGameState>,
        displayed: &DisplayState,
        authoritative: &AuthoritativeGameState,
        pending: &[PlayerInput],
        engine: &PredictionEngine,
        stats: &InputStats,
        interpolation: &mut InterpolationService,
        now_ms: u64,
    ) -> (RollbackOutcome, PredictiveGameState) {
        self.stats.reconciled += 1;
        let replayed = engine.predict_from_inputs(authoritative, pending, stats);
        let target = DisplayState::from_predictive(&replayed);
        let predicted = previous.map(|p| DisplayState::predicted_only(p, &engine.player_id()));

        let predicted = match predicted {
            Some(predicted) if self.detect_prediction_error(&predicted, &target) => predicted,
            _ => {
                self.follow(displayed, target, &engine.player_id(), interpolation, now_ms);
                return (RollbackOutcome::InSync, replayed);
            }
        };

        self.stats.detected += 1;
        let (entity_corrections, player_corrections) = Self::corrections(&predicted, &target);
        let mut event = RollbackEvent {
            id: self.next_event_id,
            base_sequence: authoritative.sequence,
            entity_corrections,
            player_corrections,
            input_replay: replayed.outcomes.iter().map(|(seq, _)| *seq).collect(),
            smoothing_duration_ms: 0,
            snapped: false,
            at_ms: now_ms,
        };
        self.next_event_id += 1;

        let magnitude = event.max_magnitude();
        let outcome = if magnitude < self.config.imperceptible_threshold_px {
            event.snapped = true;
            self.stats.snapped += 1;
            debug!(
                code = ?ErrorCode::DivergenceDetected,
                base_sequence = event.base_sequence,
                magnitude,
                corrections = event.entity_corrections.len() + event.player_corrections.len(),
                "Snapped imperceptible divergence"
            );
            interpolation.snap(target);
            RollbackOutcome::Snapped(event.clone())
        } else {
            let duration = scaled_duration(
                magnitude,
                self.config.ms_per_px,
                self.config.min_frame_ms,
                self.config.max_smoothing_ms,
            );
            event.smoothing_duration_ms = duration;
            self.stats.smoothed += 1;
            info!(
                code = ?ErrorCode::DivergenceDetected,
                base_sequence = event.base_sequence,
                magnitude,
                duration_ms = duration,
                replayed = event.input_replay.len(),
                "Smoothing prediction correction"
            );
            interpolation.start(displayed.clone(), target, now_ms, duration, Easing::EaseOut);
            RollbackOutcome::Smoothed(event.clone())
        };

        self.push_history(event);
        (outcome, replayed)
    }

    /// Carry the display to an in-sync target. The local cursor lands at once;
    /// anything else that moved eases over a distance-scaled window.
    fn follow(
        &self,
        displayed: &DisplayState,
        target: DisplayState,
        player_id: &PlayerId,
        interpolation: &mut InterpolationService,
        now_ms: u64,
    ) {
        let mut from = displayed.clone();
        if let (Some(shown), Some(landed)) = (
            from.players.iter_mut().find(|p| p.id == *player_id),
            target.player(player_id),
        ) {
            shown.cursor = landed.cursor;
        }

        let distance = from.max_displacement(&target);
        if distance <= 0.0 {
            interpolation.snap(target);
            return;
        }
        let duration = scaled_duration(
            distance,
            self.config.ms_per_px,
            self.config.min_frame_ms,
            self.config.max_smoothing_ms,
        );
        interpolation.start(from, target, now_ms, duration, Easing::EaseOut);
    }

    /// Remember a misprediction the server detected from outcome strings
    pub fn record_server_correction(&mut self, notice: CorrectionNotice) {
        debug!(
            prediction_id = %notice.prediction_id,
            input_sequence = notice.input_sequence,
            expected = %notice.expected_outcome,
            actual = %notice.actual_outcome,
            "Server reported misprediction"
        );
        self.stats.server_reported += 1;
        if self.server_corrections.len() >= self.config.history_cap.max(1) {
            self.server_corrections.pop_front();
        }
        self.server_corrections.push_back(notice);
    }

    fn push_history(&mut self, event: RollbackEvent) {
        if self.history.len() >= self.config.history_cap.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    pub fn history(&self) -> impl Iterator<Item = &RollbackEvent> {
        self.history.iter()
    }

    pub fn server_corrections(&self) -> impl Iterator<Item = &CorrectionNotice> {
        self.server_corrections.iter()
    }

    pub fn stats(&self) -> RollbackStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.server_corrections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PredictionConfig, SimulationConfig};
    use crate::game::board::{Board, BoardSize};
    use crate::game::entity::{Direction, Entity, EntityKind};
    use crate::game::simulation::PlayerState;
    use crate::game::snapshot::{compute_checksum, GamePhase};
    use uuid::Uuid;

    fn me() -> PlayerId {
        Uuid::from_u128(1)
    }

    fn state(cursor_x: f32, mouse_x: f32) -> AuthoritativeGameState {
        let mut board = Board::new(BoardSize::for_players(1, 40.0));
        board.entities.push(Entity::new(
            EntityId(1),
            EntityKind::Mouse { speed: 60.0 },
            Position::new(mouse_x, 20.0),
            Direction::Right,
        ));
        let mut player = PlayerState::new(me(), "me".into(), false);
        player.cursor = Position::new(cursor_x, 60.0);
        let players = vec![player];
        AuthoritativeGameState {
            sequence: 4,
            tick: 4,
            timestamp: 1_000,
            phase: GamePhase::Active,
            strategy: None,
            round: 1,
            checksum: compute_checksum(&board, &players),
            board,
            players,
        }
    }

    fn authoritative(cursor_x: f32) -> AuthoritativeGameState {
        state(cursor_x, 100.0)
    }

    fn engine() -> PredictionEngine {
        PredictionEngine::new(me(), PredictionConfig::default(), &SimulationConfig::default())
    }

    /// A prediction that put the local cursor at `cursor_x`
    fn predicted_at(cursor_x: f32) -> PredictiveGameState {
        engine().predict_from_inputs(&authoritative(cursor_x), &[], &InputStats::default())
    }

    fn displayed_at(cursor_x: f32) -> DisplayState {
        DisplayState::from_authoritative(&authoritative(cursor_x))
    }

    fn reconcile_with(
        manager: &mut RollbackManager,
        interp: &mut InterpolationService,
        previous: Option<&PredictiveGameState>,
        displayed: &DisplayState,
        auth: &AuthoritativeGameState,
        now_ms: u64,
    ) -> RollbackOutcome {
        let (outcome, _) = manager.reconcile(
            previous,
            displayed,
            auth,
            &[],
            &engine(),
            &InputStats::default(),
            interp,
            now_ms,
        );
        outcome
    }

    #[test]
    fn threshold_is_exclusive() {
        let manager = RollbackManager::new(RollbackConfig::default());
        let auth = displayed_at(100.0);
        assert!(!manager.detect_prediction_error(&displayed_at(101.0), &auth));
        assert!(!manager.detect_prediction_error(&displayed_at(102.0), &auth));
        assert!(manager.detect_prediction_error(&displayed_at(102.5), &auth));
    }

    #[test]
    fn small_divergence_snaps_without_transition() {
        let mut manager = RollbackManager::new(RollbackConfig::default());
        let mut interp = InterpolationService::new();
        let auth = authoritative(100.0);
        let previous = predicted_at(101.0);
        let outcome = reconcile_with(&mut manager, &mut interp, Some(&previous), &displayed_at(101.0), &auth, 1_000);
        assert_eq!(outcome, RollbackOutcome::InSync);
        assert!(!interp.is_active());
        assert_eq!(interp.current(), Some(&DisplayState::from_authoritative(&auth)));
    }

    #[test]
    fn imperceptible_corrections_snap_when_configured() {
        let mut manager = RollbackManager::new(RollbackConfig {
            divergence_threshold_px: 0.5,
            ..RollbackConfig::default()
        });
        let mut interp = InterpolationService::new();
        let previous = predicted_at(101.0);
        let outcome = reconcile_with(
            &mut manager,
            &mut interp,
            Some(&previous),
            &displayed_at(101.0),
            &authoritative(100.0),
            1_000,
        );
        assert!(matches!(outcome, RollbackOutcome::Snapped(ref ev) if ev.snapped));
        assert!(!interp.is_active());
        assert_eq!(manager.stats().snapped, 1);
    }

    #[test]
    fn large_divergence_eases_to_authoritative() {
        let mut manager = RollbackManager::new(RollbackConfig::default());
        let mut interp = InterpolationService::new();
        let auth = authoritative(100.0);
        let previous = predicted_at(110.0);
        let outcome = reconcile_with(&mut manager, &mut interp, Some(&previous), &displayed_at(110.0), &auth, 1_000);
        let event = match outcome {
            RollbackOutcome::Smoothed(ev) => ev,
            other => panic!("expected smoothing, got {other:?}"),
        };
        assert_eq!(event.smoothing_duration_ms, 25);
        assert_eq!(event.player_corrections.len(), 1);
        assert!(event.entity_corrections.is_empty());
        assert!((event.max_magnitude() - 10.0).abs() < 1e-4);

        let x = interp.update(1_010).unwrap().player(&me()).unwrap().cursor.x;
        assert!(x < 110.0 && x > 100.0);
        assert_eq!(
            interp.update(1_025),
            Some(&DisplayState::from_authoritative(&auth))
        );
        assert_eq!(manager.history().count(), 1);
    }

    #[test]
    fn walker_motion_is_not_a_misprediction() {
        let mut manager = RollbackManager::new(RollbackConfig::default());
        let mut interp = InterpolationService::new();
        let before = state(100.0, 100.0);
        let previous = engine().predict_from_inputs(&before, &[], &InputStats::default());
        let moved = state(100.0, 112.0);

        let outcome = reconcile_with(
            &mut manager,
            &mut interp,
            Some(&previous),
            &DisplayState::from_authoritative(&before),
            &moved,
            1_000,
        );
        assert_eq!(outcome, RollbackOutcome::InSync);
        assert_eq!(manager.stats().detected, 0);
        assert_eq!(manager.history().count(), 0);

        // The walker still glides to its new position
        assert!(interp.is_active());
        let x = interp.update(1_010).unwrap().entity(EntityId(1)).unwrap().position.x;
        assert!(x > 100.0 && x < 112.0);
        assert_eq!(interp.update(1_030), Some(&DisplayState::from_authoritative(&moved)));
    }

    #[test]
    fn nothing_to_correct_without_a_prediction() {
        let mut manager = RollbackManager::new(RollbackConfig::default());
        let mut interp = InterpolationService::new();
        let auth = authoritative(100.0);
        let outcome = reconcile_with(&mut manager, &mut interp, None, &displayed_at(150.0), &auth, 1_000);
        assert_eq!(outcome, RollbackOutcome::InSync);
        assert_eq!(manager.stats().detected, 0);
        assert_eq!(interp.current(), Some(&DisplayState::from_authoritative(&auth)));
    }

    #[test]
    fn history_is_capped() {
        let mut manager = RollbackManager::new(RollbackConfig {
            history_cap: 2,
            ..RollbackConfig::default()
        });
        let mut interp = InterpolationService::new();
        for n in 0..5 {
            let previous = predicted_at(150.0 + n as f32);
            reconcile_with(
                &mut manager,
                &mut interp,
                Some(&previous),
                &displayed_at(150.0 + n as f32),
                &authoritative(100.0),
                n,
            );
        }
        let ids: Vec<u64> = manager.history().map(|e| e.id).collect();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(manager.stats().detected, 5);
    }

    #[test]
    fn server_corrections_are_counted() {
        let mut manager = RollbackManager::new(RollbackConfig::default());
        manager.record_server_correction(CorrectionNotice {
            prediction_id: "p-1".into(),
            input_sequence: 1,
            expected_outcome: "arrow:1,1:up".into(),
            actual_outcome: "ignored".into(),
            authoritative_sequence: 7,
        });
        assert_eq!(manager.stats().server_reported, 1);
        assert_eq!(manager.server_corrections().count(), 1);
    }
}
