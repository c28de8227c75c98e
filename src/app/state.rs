//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::store::{InMemoryScoreStore, ScoreRepository};
use crate::util::time::{Clock, SystemClock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: Arc<MatchRegistry>,
    pub scores: Arc<dyn ScoreRepository>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, Arc::new(InMemoryScoreStore::new()), Arc::new(SystemClock))
    }

    /// Build with an explicit score store and clock
    pub fn with_parts(config: Config, scores: Arc<dyn ScoreRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            match_registry: Arc::new(MatchRegistry::new()),
            scores,
            clock,
        }
    }
}
