//! Authoritative snapshots and their checksum

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::board::Board;
use super::entity::{Entity, EntityId, PlayerId};
use super::simulation::{PlayerState, Simulation};
use super::strategy::Strategy;

/// Hex characters of the SHA-256 digest kept in the checksum
const CHECKSUM_LEN: usize = 16;

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Waiting for enough humans
    Waiting,
    /// Rounds in progress
    Active,
    /// Game over, scores being settled
    Ending,
}

/// Full authoritative state as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeGameState {
    /// Counts snapshots built, one per state send
    pub sequence: u64,
    /// Simulation tick the snapshot was taken at
    pub tick: u64,
    /// Server milliseconds
    pub timestamp: u64,
    pub phase: GamePhase,
    pub strategy: Option<Strategy>,
    pub round: u32,
    pub board: Board,
    /// Sorted by player id
    pub players: Vec<PlayerState>,
    pub checksum: String,
}

impl AuthoritativeGameState {
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.board.find(id)
    }

    /// Recompute the checksum and compare
    pub fn verify(&self) -> bool {
        compute_checksum(&self.board, &self.players) == self.checksum
    }
}

/// Truncated SHA-256 over the JSON of (board, players)
pub fn compute_checksum(board: &Board, players: &[PlayerState]) -> String {
    let bytes = serde_json::to_vec(&(board, players)).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(CHECKSUM_LEN);
    hex
}

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    last_sequence: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { last_sequence: 0 }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Snapshot the simulation, consuming the next sequence number
    pub fn build(&mut self, sim: &Simulation, timestamp: u64) -> AuthoritativeGameState {
        self.last_sequence += 1;
        let board = sim.board().clone();
        let players: Vec<PlayerState> = sim.players().values().cloned().collect();
        let checksum = compute_checksum(&board, &players);

        AuthoritativeGameState {
            sequence: self.last_sequence,
            tick: sim.tick_count(),
            timestamp,
            phase: sim.phase(),
            strategy: sim.strategy(),
            round: sim.round(),
            board,
            players,
            checksum,
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use uuid::Uuid;

    fn sim() -> Simulation {
        let mut sim = Simulation::new(SimulationConfig::default(), 4, 0);
        sim.add_player(Uuid::from_u128(1), "ada".into()).unwrap();
        sim.tick(0);
        sim
    }

    #[test]
    fn sequences_count_builds_not_ticks() {
        let mut sim = sim();
        let mut builder = SnapshotBuilder::new();
        let first = builder.build(&sim, 10);
        sim.tick(33);
        sim.tick(66);
        let second = builder.build(&sim, 70);
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.tick, first.tick + 2);
    }

    #[test]
    fn checksum_tracks_content() {
        let sim = sim();
        let mut builder = SnapshotBuilder::new();
        let mut state = builder.build(&sim, 0);
        assert_eq!(state.checksum.len(), CHECKSUM_LEN);
        assert!(state.verify());

        state.players[0].score += 1;
        assert!(!state.verify());
    }

    #[test]
    fn phase_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&GamePhase::Active).unwrap(), "\"ACTIVE\"");
    }
}
