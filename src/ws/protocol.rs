//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::delta::{DeltaState, StateUpdate};
use crate::game::entity::{Direction, PlayerId};
use crate::game::input::{PlayerAction, PlayerInput};
use crate::game::snapshot::AuthoritativeGameState;

/// Client-side prediction attached to a sequenced input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMeta {
    /// Client-generated id, echoed back in corrections
    pub id: String,
    /// Outcome string the client expects the server to reach
    pub expected_outcome: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Cursor move; the server assigns the sequence
    Move { x: f32, y: f32 },

    /// Place an arrow under the cursor
    ArrowPlace { direction: Direction },

    Action { action: PlayerAction },

    /// Input sequenced and predicted by the client
    PredictiveInput {
        input: PlayerInput,
        prediction: PredictionMeta,
    },

    /// Ask for a full snapshot on the next send
    Resync,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the game
    Quit,
}

/// Player info for join notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: PlayerId,
    pub display_name: String,
    pub is_bot: bool,
}

/// Final standing sent when a game ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub player_id: PlayerId,
    pub display_name: String,
    pub score: u64,
}

/// Server-detected misprediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionNotice {
    pub prediction_id: String,
    pub input_sequence: u64,
    pub expected_outcome: String,
    pub actual_outcome: String,
    /// Snapshot sequence the client should reconcile against
    pub authoritative_sequence: u64,
}

/// Wire-level error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimitExceeded,
    InvalidPlayerId,
    PredictionTimeout,
    DivergenceDetected,
    InvalidInput,
    MatchFull,
    MatchEnding,
    BadMessage,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: PlayerId,
        server_time: u64,
    },

    /// Confirmation of game join
    Joined {
        match_id: Uuid,
        /// Seed for deterministic random generation
        seed: u64,
        player_id: PlayerId,
        /// All players in the game at join time
        players: Vec<PlayerInfo>,
    },

    PlayerJoined {
        player: PlayerInfo,
    },

    PlayerLeft {
        player_id: PlayerId,
        reason: String,
    },

    /// Full authoritative snapshot
    State {
        state: Box<AuthoritativeGameState>,
    },

    /// Changes since the previous snapshot
    Delta {
        delta: Box<DeltaState>,
    },

    /// Cumulative: every input up to `acknowledged_sequence` was applied
    InputAcknowledgment {
        player_id: PlayerId,
        acknowledged_sequence: u64,
        /// Milliseconds from receipt to acknowledgment
        processing_time: u64,
    },

    RollbackCorrection {
        correction: CorrectionNotice,
    },

    GameOver {
        scores: Vec<FinalScore>,
    },

    /// Error message
    Error {
        code: ErrorCode,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    /// High-priority messages skip broadcast batching
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            ServerMsg::InputAcknowledgment { .. }
                | ServerMsg::RollbackCorrection { .. }
                | ServerMsg::Error { .. }
                | ServerMsg::Pong { .. }
        )
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code,
            message: message.into(),
        }
    }
}

impl From<StateUpdate> for ServerMsg {
    fn from(update: StateUpdate) -> Self {
        match update {
            StateUpdate::Full(state) => ServerMsg::State {
                state: Box::new(state),
            },
            StateUpdate::Delta(delta) => ServerMsg::Delta {
                delta: Box::new(delta),
            },
        }
    }
}

/// A server message plus who should receive it
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// `None` broadcasts to every player in the game
    pub to: Option<PlayerId>,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self { to: None, msg }
    }

    pub fn to(player_id: PlayerId, msg: ServerMsg) -> Self {
        Self {
            to: Some(player_id),
            msg,
        }
    }

    pub fn is_for(&self, player_id: &PlayerId) -> bool {
        self.to.map_or(true, |to| to == *player_id)
    }
}
