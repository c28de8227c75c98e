//! Game simulation modules

pub mod board;
pub mod delta;
pub mod entity;
pub mod input;
pub mod r#match;
pub mod physics;
pub mod scheduler;
pub mod scoring;
pub mod simulation;
pub mod snapshot;
pub mod spatial;
pub mod strategy;

pub use r#match::{GameMatch, JoinFailure, MatchCommand, MatchCore, MatchHandle, MatchRegistry};
pub use simulation::{PlayerState, Simulation};
pub use snapshot::{AuthoritativeGameState, GamePhase};
