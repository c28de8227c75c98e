//! Configuration module - environment variable parsing and gameplay tuning

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::board::GOAL_SLOTS;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma separated, `*` for any)
    pub client_origin: String,
    /// Gameplay tuning handed to every match
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let mut game = GameConfig::default();
        if let Some(base) = parse_var::<u64>("TICK_BASE_MS")? {
            game.scheduler.base_interval_ms = base;
        }
        if let Some(max_players) = parse_var::<usize>("MAX_PLAYERS_PER_GAME")? {
            game.simulation.max_players = check_max_players(max_players)?;
        }
        if let Some(limit) = parse_var::<usize>("INPUT_RATE_LIMIT")? {
            game.input.rate_limit = limit;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            game,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Every seat needs its own goal cell
fn check_max_players(max_players: usize) -> Result<usize, ConfigError> {
    if (1..=GOAL_SLOTS).contains(&max_players) {
        Ok(max_players)
    } else {
        Err(ConfigError::Invalid("MAX_PLAYERS_PER_GAME"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

/// All gameplay tuning, passed explicitly into constructors
#[derive(Clone, Debug, Default)]
pub struct GameConfig {
    pub simulation: SimulationConfig,
    pub input: InputConfig,
    pub scheduler: SchedulerConfig,
    pub delta: DeltaConfig,
    pub prediction: PredictionConfig,
    pub rollback: RollbackConfig,
    pub connection: ConnectionConfig,
}

/// Authoritative simulation rules
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Grid cell edge in pixels
    pub tile_size: f32,
    /// Distance at which a goal swallows a walker
    pub absorption_radius: f32,
    /// Distance at which a cat catches a mouse
    pub collision_radius: f32,
    /// Length of one strategy round
    pub round_duration_ms: u64,
    /// Rounds before the game ends (0 = play until everyone leaves)
    pub max_rounds: u32,
    pub mouse_points: u64,
    /// Fraction of the goal owner's score a cat takes away
    pub cat_penalty_ratio: f64,
    /// Points per second awarded to everyone at each rotation
    pub time_reward_per_sec: f64,
    pub max_arrows_per_player: usize,
    pub bot_cooldown_ms: u64,
    /// Bots are added until this many players are present
    pub bot_fill_target: usize,
    pub min_humans_to_start: usize,
    pub ending_grace_ms: u64,
    pub max_players: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tile_size: 40.0,
            absorption_radius: 20.0,
            collision_radius: 16.0,
            round_duration_ms: 30_000,
            max_rounds: 0,
            mouse_points: 1,
            cat_penalty_ratio: 1.0 / 3.0,
            time_reward_per_sec: 0.1,
            max_arrows_per_player: 3,
            bot_cooldown_ms: 1_500,
            bot_fill_target: 2,
            min_humans_to_start: 1,
            ending_grace_ms: 3_000,
            max_players: 8,
        }
    }
}

impl SimulationConfig {
    /// Seats a match actually offers, bounded by the board's goal cells
    pub fn seat_limit(&self) -> usize {
        self.max_players.clamp(1, GOAL_SLOTS)
    }
}

/// Input sequencing, rate limiting and acknowledgment timing
#[derive(Clone, Debug)]
pub struct InputConfig {
    pub rate_limit: usize,
    pub rate_window_ms: u64,
    pub buffer_capacity: usize,
    pub ack_timeout_ms: u64,
    /// Acknowledged/dropped outcomes remembered for drop rate and latency
    pub stats_window: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            rate_limit: 60,
            rate_window_ms: 1_000,
            buffer_capacity: 10,
            ack_timeout_ms: 1_000,
            stats_window: 32,
        }
    }
}

/// Adaptive tick interval: `clamp(min, max, base + players * per_player + entities / per_entities)`
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub base_interval_ms: u64,
    pub per_player_ms: u64,
    /// One extra millisecond per this many entities
    pub entities_per_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 33,
            per_player_ms: 2,
            entities_per_ms: 10,
            min_interval_ms: 16,
            max_interval_ms: 66,
        }
    }
}

/// Delta compression and outbound batching
#[derive(Clone, Debug)]
pub struct DeltaConfig {
    /// Sends averaged for the compression ratio
    pub ratio_window: usize,
    pub min_batch_delay_ms: u64,
    pub max_batch_delay_ms: u64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            ratio_window: 10,
            min_batch_delay_ms: 3,
            max_batch_delay_ms: 15,
        }
    }
}

/// Client prediction confidence policy
#[derive(Clone, Debug)]
pub struct PredictionConfig {
    /// Confidence lost per pending unacknowledged input
    pub pending_penalty: f32,
    pub pending_floor: f32,
    pub drop_floor: f32,
    pub latency_threshold_ms: f32,
    pub latency_factor: f32,
    pub min_confidence: f32,
    pub max_confidence: f32,
    pub extrapolate_entities: bool,
    pub max_extrapolation_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            pending_penalty: 0.1,
            pending_floor: 0.5,
            drop_floor: 0.3,
            latency_threshold_ms: 200.0,
            latency_factor: 0.8,
            min_confidence: 0.1,
            max_confidence: 1.0,
            extrapolate_entities: true,
            max_extrapolation_ms: 100,
        }
    }
}

/// Client divergence handling
#[derive(Clone, Debug)]
pub struct RollbackConfig {
    /// Predicted-vs-authoritative distance that counts as divergence
    pub divergence_threshold_px: f32,
    /// Corrections smaller than this snap without a visible transition
    pub imperceptible_threshold_px: f32,
    pub min_frame_ms: u64,
    pub max_smoothing_ms: u64,
    /// Smoothing time per pixel of correction
    pub ms_per_px: f32,
    pub history_cap: usize,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            divergence_threshold_px: 2.0,
            imperceptible_threshold_px: 2.0,
            min_frame_ms: 16,
            max_smoothing_ms: 50,
            ms_per_px: 2.5,
            history_cap: 32,
        }
    }
}

/// Per-socket limits
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub frames_per_second: u32,
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 120,
            outbound_buffer: 256,
        }
    }
}
