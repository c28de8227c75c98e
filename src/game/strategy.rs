//! Round strategies: which walkers a round starts with and how it spawns more

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Round strategy selected at each phase rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Lots of mice, no cats
    MouseParade,
    /// A few mice hunted by several cats
    CatPatrol,
    /// Fast walkers, quick trickle
    Stampede,
    Mixed,
}

/// Spawn parameters for a strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnProfile {
    pub initial_mice: usize,
    pub initial_cats: usize,
    pub mouse_speed: f32,
    pub cat_speed: f32,
    /// Milliseconds between trickle spawns (0 = no trickle)
    pub spawn_every_ms: u64,
    /// Chance a trickle spawn is a cat
    pub cat_chance: f64,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::MouseParade,
        Strategy::CatPatrol,
        Strategy::Stampede,
        Strategy::Mixed,
    ];

    pub fn profile(self) -> SpawnProfile {
        match self {
            Strategy::MouseParade => SpawnProfile {
                initial_mice: 8,
                initial_cats: 0,
                mouse_speed: 80.0,
                cat_speed: 0.0,
                spawn_every_ms: 500,
                cat_chance: 0.0,
            },
            Strategy::CatPatrol => SpawnProfile {
                initial_mice: 4,
                initial_cats: 3,
                mouse_speed: 80.0,
                cat_speed: 60.0,
                spawn_every_ms: 1_000,
                cat_chance: 0.2,
            },
            Strategy::Stampede => SpawnProfile {
                initial_mice: 6,
                initial_cats: 1,
                mouse_speed: 140.0,
                cat_speed: 100.0,
                spawn_every_ms: 250,
                cat_chance: 0.05,
            },
            Strategy::Mixed => SpawnProfile {
                initial_mice: 6,
                initial_cats: 2,
                mouse_speed: 90.0,
                cat_speed: 70.0,
                spawn_every_ms: 700,
                cat_chance: 0.1,
            },
        }
    }

    /// Seeded pick of a strategy different from `current`
    pub fn next(current: Option<Strategy>, rng: &mut ChaCha8Rng) -> Strategy {
        let choices: Vec<Strategy> = Self::ALL
            .iter()
            .copied()
            .filter(|s| Some(*s) != current)
            .collect();
        choices[rng.gen_range(0..choices.len())]
    }
}
