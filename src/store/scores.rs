//! Player score persistence

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::game::entity::PlayerId;

/// Serializable per-player score record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub player_id: PlayerId,
    pub display_name: String,
    pub best_score: u64,
    pub last_score: u64,
    pub games_played: u32,
    pub updated_at: DateTime<Utc>,
}

/// Score store operations
pub trait ScoreRepository: Send + Sync {
    fn get(&self, player_id: &PlayerId) -> Option<ScoreSnapshot>;

    /// Fold a finished game's score into the player's record
    fn record_game(&self, player_id: PlayerId, display_name: &str, score: u64) -> ScoreSnapshot;

    /// Best scores first
    fn leaderboard(&self, limit: usize) -> Vec<ScoreSnapshot>;
}

/// Process-local score store
#[derive(Debug, Default)]
pub struct InMemoryScoreStore {
    scores: DashMap<PlayerId, ScoreSnapshot>,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl ScoreRepository for InMemoryScoreStore {
    fn get(&self, player_id: &PlayerId) -> Option<ScoreSnapshot> {
        self.scores.get(player_id).map(|s| s.value().clone())
    }

    fn record_game(&self, player_id: PlayerId, display_name: &str, score: u64) -> ScoreSnapshot {
        let now = Utc::now();
        let mut entry = self.scores.entry(player_id).or_insert_with(|| ScoreSnapshot {
            player_id,
            display_name: display_name.to_string(),
            best_score: 0,
            last_score: 0,
            games_played: 0,
            updated_at: now,
        });
        let record = entry.value_mut();
        record.display_name = display_name.to_string();
        record.best_score = record.best_score.max(score);
        record.last_score = score;
        record.games_played += 1;
        record.updated_at = now;
        record.clone()
    }

    fn leaderboard(&self, limit: usize) -> Vec<ScoreSnapshot> {
        let mut all: Vec<ScoreSnapshot> = self.scores.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| {
            b.best_score
                .cmp(&a.best_score)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        all.truncate(limit);
        all
    }
}
