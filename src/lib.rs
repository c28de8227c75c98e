//! Arcade Sync - real-time state synchronization for a multiplayer arcade game
//!
//! The server side runs one authoritative simulation per match and streams
//! delta-compressed snapshots over WebSockets. The client side predicts the
//! local player's inputs, interpolates between states and rolls back when the
//! server disagrees.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod store;
pub mod util;
pub mod ws;
