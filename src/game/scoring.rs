//! Scoring rules - goal absorption and round rewards

use crate::config::SimulationConfig;

/// What a goal swallowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    Mouse,
    Cat,
}

/// Scoring system for goals and round rotation
pub struct ScoringSystem;

impl ScoringSystem {
    /// New score for a goal owner after absorbing a walker
    pub fn apply_absorption(score: u64, absorbed: Absorbed, config: &SimulationConfig) -> u64 {
        match absorbed {
            Absorbed::Mouse => score.saturating_add(config.mouse_points),
            Absorbed::Cat => {
                let ratio = config.cat_penalty_ratio.clamp(0.0, 1.0);
                let penalty = (score as f64 * ratio).floor() as u64;
                score.saturating_sub(penalty)
            }
        }
    }

    /// Points everyone earns for surviving a round of `elapsed_ms`
    pub fn time_reward(elapsed_ms: u64, config: &SimulationConfig) -> u64 {
        let secs = elapsed_ms as f64 / 1000.0;
        (secs * config.time_reward_per_sec.max(0.0)).floor() as u64
    }
}
