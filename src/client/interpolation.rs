//! Eased transitions between two displayable states

use crate::game::board::Board;
use crate::game::entity::{Entity, EntityId, EntityKind, PlayerId, Position};
use crate::game::simulation::PlayerState;
use crate::game::snapshot::{AuthoritativeGameState, GamePhase};

use super::prediction::PredictiveGameState;

/// Progress curve for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Easing {
    Linear,
    /// Fast start, gentle landing
    #[default]
    EaseOut,
    EaseInOut,
}

impl Easing {
    /// Map linear progress in [0, 1] onto the curve
    pub fn apply(self, p: f32) -> f32 {
        let p = p.clamp(0.0, 1.0);
        match self {
            Easing::Linear => p,
            Easing::EaseOut => 1.0 - (1.0 - p) * (1.0 - p),
            Easing::EaseInOut => {
                if p < 0.5 {
                    2.0 * p * p
                } else {
                    1.0 - (-2.0 * p + 2.0).powi(2) / 2.0
                }
            }
        }
    }
}

/// Duration for a transition covering `distance_px`, clamped to `[min_ms, max_ms]`
pub fn scaled_duration(distance_px: f32, ms_per_px: f32, min_ms: u64, max_ms: u64) -> u64 {
    let raw = (distance_px.max(0.0) * ms_per_px).round() as u64;
    raw.clamp(min_ms, max_ms.max(min_ms))
}

/// What the renderer draws this frame
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub sequence: u64,
    pub phase: GamePhase,
    pub board: Board,
    pub players: Vec<PlayerState>,
    pub confidence: f32,
}

impl DisplayState {
    pub fn from_authoritative(state: &AuthoritativeGameState) -> Self {
        Self {
            sequence: state.sequence,
            phase: state.phase,
            board: state.board.clone(),
            players: state.players.clone(),
            confidence: 1.0,
        }
    }

    pub fn from_predictive(state: &PredictiveGameState) -> Self {
        Self {
            sequence: state.base_sequence,
            phase: state.phase,
            board: state.board.clone(),
            players: state.players.clone(),
            confidence: state.confidence,
        }
    }

    /// The part of a prediction that local input produced: the local cursor
    /// and the non-walker entities it placed or changed. Walkers are only
    /// extrapolated, so their drift is not a misprediction.
    pub fn predicted_only(state: &PredictiveGameState, player_id: &PlayerId) -> Self {
        let mut board = Board::new(state.board.size);
        for entity in state.predicted_entities.values().filter(|e| !e.is_walker()) {
            match entity.kind {
                EntityKind::Goal { .. } => board.goals.push(entity.clone()),
                EntityKind::Wall => board.walls.push(entity.clone()),
                _ => board.arrows.push(entity.clone()),
            }
        }
        Self {
            sequence: state.base_sequence,
            phase: state.phase,
            board,
            players: state.player(player_id).cloned().into_iter().collect(),
            confidence: state.confidence,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.board.find(id)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }

    /// Largest distance any shared entity or cursor moves between the two states
    pub fn max_displacement(&self, other: &DisplayState) -> f32 {
        let entities = self
            .board
            .all_entities()
            .filter_map(|e| other.entity(e.id).map(|o| e.position.distance(o.position)));
        let cursors = self
            .players
            .iter()
            .filter_map(|p| other.player(&p.id).map(|o| p.cursor.distance(o.cursor)));
        entities.chain(cursors).fold(0.0, f32::max)
    }
}

/// Blend `from` towards `to` at eased progress `t`.
///
/// The result has `to`'s structure; entities are paired by id, falling back
/// to the entity at the same list index when it is of the same kind.
pub fn interpolate(from: &DisplayState, to: &DisplayState, t: f32) -> DisplayState {
    let mut out = to.clone();
    blend_list(&mut out.board.entities, &from.board, &from.board.entities, t);
    blend_list(&mut out.board.goals, &from.board, &from.board.goals, t);
    blend_list(&mut out.board.walls, &from.board, &from.board.walls, t);
    blend_list(&mut out.board.arrows, &from.board, &from.board.arrows, t);

    for (idx, player) in out.players.iter_mut().enumerate() {
        let start = from
            .player(&player.id)
            .or_else(|| from.players.get(idx))
            .map(|p| p.cursor);
        if let Some(start) = start {
            player.cursor = start.lerp(player.cursor, t);
        }
    }
    out
}

fn blend_list(targets: &mut [Entity], from_board: &Board, from_list: &[Entity], t: f32) {
    for (idx, target) in targets.iter_mut().enumerate() {
        let start = from_board
            .find(target.id)
            .or_else(|| from_list.get(idx).filter(|e| e.label() == target.label()))
            .map(|e| e.position);
        if let Some(start) = start {
            target.position = lerp_position(start, target.position, t);
        }
    }
}

fn lerp_position(from: Position, to: Position, t: f32) -> Position {
    if t >= 1.0 {
        to
    } else {
        from.lerp(to, t)
    }
}

#[derive(Debug, Clone)]
struct Transition {
    from: DisplayState,
    to: DisplayState,
    start_ms: u64,
    duration_ms: u64,
    easing: Easing,
}

/// Drives one transition at a time; a new start replaces the running one
#[derive(Debug, Clone, Default)]
pub struct InterpolationService {
    transition: Option<Transition>,
    current: Option<DisplayState>,
}

impl InterpolationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        from: DisplayState,
        to: DisplayState,
        now_ms: u64,
        duration_ms: u64,
        easing: Easing,
    ) {
        if duration_ms == 0 {
            self.snap(to);
            return;
        }
        self.current = Some(from.clone());
        self.transition = Some(Transition {
            from,
            to,
            start_ms: now_ms,
            duration_ms,
            easing,
        });
    }

    /// Jump straight to `state` with no visible transition
    pub fn snap(&mut self, state: DisplayState) {
        self.transition = None;
        self.current = Some(state);
    }

    /// Advance the running transition; once finished the target is returned exactly
    pub fn update(&mut self, now_ms: u64) -> Option<&DisplayState> {
        if let Some(transition) = &self.transition {
            let elapsed = now_ms.saturating_sub(transition.start_ms);
            let progress = (elapsed as f32 / transition.duration_ms as f32).clamp(0.0, 1.0);
            if progress >= 1.0 {
                let done = self.transition.take().map(|t| t.to);
                self.current = done;
            } else {
                let eased = transition.easing.apply(progress);
                self.current = Some(interpolate(&transition.from, &transition.to, eased));
            }
        }
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&DisplayState> {
        self.current.as_ref()
    }

    pub fn target(&self) -> Option<&DisplayState> {
        self.transition.as_ref().map(|t| &t.to)
    }

    pub fn is_active(&self) -> bool {
        self.transition.is_some()
    }

    /// Remaining time of the running transition
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.transition.as_ref().map_or(0, |t| {
            (t.start_ms + t.duration_ms).saturating_sub(now_ms)
        })
    }
}
