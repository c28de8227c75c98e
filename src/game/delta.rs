//! Delta compression between consecutive snapshots

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::DeltaConfig;

use super::board::{Board, BoardSize};
use super::entity::{Entity, EntityId, EntityKind, PlayerId};
use super::simulation::PlayerState;
use super::snapshot::{AuthoritativeGameState, GamePhase};
use super::strategy::Strategy;

/// Changes between a snapshot and the one built right before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaState {
    pub base_sequence: u64,
    /// Always `base_sequence + 1`
    pub delta_sequence: u64,
    pub tick: u64,
    pub timestamp: u64,
    pub phase: GamePhase,
    pub strategy: Option<Strategy>,
    pub round: u32,
    pub board_size: BoardSize,
    pub changed_players: Vec<PlayerState>,
    pub removed_players: Vec<PlayerId>,
    pub changed_entities: Vec<Entity>,
    pub removed_ids: Vec<EntityId>,
    pub checksum: String,
    /// `1 - size(delta) / size(full)`, in [0, 1]
    pub compression_ratio: f32,
}

impl DeltaState {
    pub fn is_empty(&self) -> bool {
        self.changed_players.is_empty()
            && self.removed_players.is_empty()
            && self.changed_entities.is_empty()
            && self.removed_ids.is_empty()
    }
}

/// Delta application errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("delta expects base {expected}, have {found}")]
    BaseMismatch { expected: u64, found: u64 },

    #[error("delta received without a baseline snapshot")]
    NoBaseline,
}

/// What goes on the wire for one state send
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Full(AuthoritativeGameState),
    Delta(DeltaState),
}

impl StateUpdate {
    pub fn sequence(&self) -> u64 {
        match self {
            StateUpdate::Full(state) => state.sequence,
            StateUpdate::Delta(delta) => delta.delta_sequence,
        }
    }
}

fn json_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

/// Structural diff of two snapshots. Pure; the ratio is filled in from the
/// serialized sizes of the delta and of `current`.
pub fn diff(previous: &AuthoritativeGameState, current: &AuthoritativeGameState) -> DeltaState {
    let prev_players: HashMap<PlayerId, &PlayerState> =
        previous.players.iter().map(|p| (p.id, p)).collect();
    let changed_players: Vec<PlayerState> = current
        .players
        .iter()
        .filter(|p| prev_players.get(&p.id).map_or(true, |old| *old != *p))
        .cloned()
        .collect();
    let current_players: HashSet<PlayerId> = current.players.iter().map(|p| p.id).collect();
    let removed_players: Vec<PlayerId> = previous
        .players
        .iter()
        .map(|p| p.id)
        .filter(|id| !current_players.contains(id))
        .collect();

    let prev_entities: HashMap<EntityId, &Entity> =
        previous.board.all_entities().map(|e| (e.id, e)).collect();
    let mut changed_entities: Vec<Entity> = current
        .board
        .all_entities()
        .filter(|e| prev_entities.get(&e.id).map_or(true, |old| *old != *e))
        .cloned()
        .collect();
    changed_entities.sort_by_key(|e| e.id);
    let current_ids: HashSet<EntityId> = current.board.all_entities().map(|e| e.id).collect();
    let mut removed_ids: Vec<EntityId> = previous
        .board
        .all_entities()
        .map(|e| e.id)
        .filter(|id| !current_ids.contains(id))
        .collect();
    removed_ids.sort();

    let mut delta = DeltaState {
        base_sequence: previous.sequence,
        delta_sequence: previous.sequence + 1,
        tick: current.tick,
        timestamp: current.timestamp,
        phase: current.phase,
        strategy: current.strategy,
        round: current.round,
        board_size: current.board.size,
        changed_players,
        removed_players,
        changed_entities,
        removed_ids,
        checksum: current.checksum.clone(),
        compression_ratio: 0.0,
    };

    let full = json_len(current);
    if full > 0 {
        let ratio = 1.0 - json_len(&delta) as f32 / full as f32;
        delta.compression_ratio = ratio.clamp(0.0, 1.0);
    }
    delta
}

/// Rebuild the snapshot a delta was computed against
pub fn apply(
    previous: &AuthoritativeGameState,
    delta: &DeltaState,
) -> Result<AuthoritativeGameState, DeltaError> {
    if previous.sequence != delta.base_sequence {
        return Err(DeltaError::BaseMismatch {
            expected: delta.base_sequence,
            found: previous.sequence,
        });
    }

    let mut players = previous.players.clone();
    players.retain(|p| !delta.removed_players.contains(&p.id));
    for changed in &delta.changed_players {
        match players.iter_mut().find(|p| p.id == changed.id) {
            Some(slot) => *slot = changed.clone(),
            None => players.push(changed.clone()),
        }
    }
    players.sort_by_key(|p| p.id);

    let mut board = previous.board.clone();
    board.size = delta.board_size;
    let removed: HashSet<EntityId> = delta.removed_ids.iter().copied().collect();
    for list in [
        &mut board.entities,
        &mut board.goals,
        &mut board.walls,
        &mut board.arrows,
    ] {
        list.retain(|e| !removed.contains(&e.id));
    }
    for changed in &delta.changed_entities {
        upsert(&mut board, changed);
    }
    for list in [
        &mut board.entities,
        &mut board.goals,
        &mut board.walls,
        &mut board.arrows,
    ] {
        list.sort_by_key(|e| e.id);
    }

    Ok(AuthoritativeGameState {
        sequence: delta.delta_sequence,
        tick: delta.tick,
        timestamp: delta.timestamp,
        phase: delta.phase,
        strategy: delta.strategy,
        round: delta.round,
        board,
        players,
        checksum: delta.checksum.clone(),
    })
}

fn upsert(board: &mut Board, entity: &Entity) {
    let list = match entity.kind {
        EntityKind::Mouse { .. } | EntityKind::Cat { .. } => &mut board.entities,
        EntityKind::Goal { .. } => &mut board.goals,
        EntityKind::Wall => &mut board.walls,
        EntityKind::Arrow { .. } => &mut board.arrows,
    };
    match list.iter_mut().find(|e| e.id == entity.id) {
        Some(slot) => *slot = entity.clone(),
        None => list.push(entity.clone()),
    }
}

/// Compression counters for debugging
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressionStats {
    pub full_sends: u64,
    pub delta_sends: u64,
    pub full_bytes: u64,
    pub delta_bytes: u64,
    pub average_ratio: f32,
}

/// Per-stream delta encoder: remembers the last snapshot sent and the
/// recent compression ratios
pub struct DeltaCompressor {
    config: DeltaConfig,
    last_sent: Option<AuthoritativeGameState>,
    ratios: VecDeque<f32>,
    stats: CompressionStats,
}

impl DeltaCompressor {
    pub fn new(config: DeltaConfig) -> Self {
        Self {
            ratios: VecDeque::with_capacity(config.ratio_window),
            config,
            last_sent: None,
            stats: CompressionStats::default(),
        }
    }

    /// Encode `current` against the previous send. Without a consecutive
    /// baseline the full snapshot goes out instead.
    pub fn encode(&mut self, current: AuthoritativeGameState) -> StateUpdate {
        let update = match &self.last_sent {
            Some(previous) if previous.sequence + 1 == current.sequence => {
                let delta = diff(previous, &current);
                self.stats.delta_sends += 1;
                self.stats.delta_bytes += json_len(&delta) as u64;
                self.record(delta.compression_ratio);
                StateUpdate::Delta(delta)
            }
            _ => {
                self.stats.full_sends += 1;
                self.stats.full_bytes += json_len(&current) as u64;
                self.record(0.0);
                StateUpdate::Full(current.clone())
            }
        };
        self.last_sent = Some(current);
        update
    }

    fn record(&mut self, ratio: f32) {
        if self.ratios.len() >= self.config.ratio_window.max(1) {
            self.ratios.pop_front();
        }
        self.ratios.push_back(ratio);
        self.stats.average_ratio = self.average_ratio();
    }

    /// Forget the baseline; the next send is a full snapshot
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.last_sent.is_some()
    }

    pub fn average_ratio(&self) -> f32 {
        if self.ratios.is_empty() {
            return 0.0;
        }
        self.ratios.iter().sum::<f32>() / self.ratios.len() as f32
    }

    /// High compression means little is changing: send sooner.
    /// Low compression means bursts: wait longer and coalesce.
    pub fn batch_delay_ms(&self) -> u64 {
        let min = self.config.min_batch_delay_ms as f32;
        let max = self.config.max_batch_delay_ms.max(self.config.min_batch_delay_ms) as f32;
        let ratio = self.average_ratio().clamp(0.0, 1.0);
        (max - ratio * (max - min)).round() as u64
    }

    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }
}
