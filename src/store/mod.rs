//! Data store modules

pub mod scores;

pub use scores::{InMemoryScoreStore, ScoreRepository, ScoreSnapshot};
