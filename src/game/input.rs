//! Input sequencing, rate limiting and acknowledgment tracking
//!
//! Used on both ends of the wire: the client sequences its own inputs and
//! waits for acknowledgments, the server re-validates ordering and rate and
//! acknowledges what it applied.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::InputConfig;
use crate::util::rate_limit::SlidingWindowLimiter;
use crate::ws::protocol::ErrorCode;

use super::entity::{Direction, PlayerId};

/// Input category, mirrored from the payload for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputType {
    Move,
    ArrowPlace,
    Action,
}

/// Discrete player actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerAction {
    /// Remove all of the player's own arrows
    ClearArrows,
}

/// Raw input as emitted by the input widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputPayload {
    Move { x: f32, y: f32 },
    ArrowPlace { direction: Direction },
    Action { action: PlayerAction },
}

impl InputPayload {
    pub fn input_type(&self) -> InputType {
        match self {
            InputPayload::Move { .. } => InputType::Move,
            InputPayload::ArrowPlace { .. } => InputType::ArrowPlace,
            InputPayload::Action { .. } => InputType::Action,
        }
    }
}

/// A sequenced input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player_id: PlayerId,
    pub sequence: u64,
    /// Milliseconds on the server timeline
    pub timestamp: u64,
    pub input_type: InputType,
    pub payload: InputPayload,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub ack_timeout_ms: u64,
}

/// Why an input was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputRejected {
    #[error("input rate limit exceeded")]
    RateLimitExceeded,

    #[error("unknown player {0}")]
    InvalidPlayerId(PlayerId),

    #[error("sequence {got} does not follow {last}")]
    StaleSequence { last: u64, got: u64 },
}

impl InputRejected {
    pub fn code(&self) -> ErrorCode {
        match self {
            InputRejected::RateLimitExceeded => ErrorCode::RateLimitExceeded,
            InputRejected::InvalidPlayerId(_) => ErrorCode::InvalidPlayerId,
            InputRejected::StaleSequence { .. } => ErrorCode::InvalidInput,
        }
    }
}

#[derive(Debug, Clone)]
struct BufferedInput {
    input: PlayerInput,
    armed_at: u64,
}

/// Bounded FIFO of unacknowledged inputs
#[derive(Debug, Clone)]
pub struct InputBuffer {
    entries: VecDeque<BufferedInput>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an input, returning the oldest entry if it had to make room
    pub fn push(&mut self, input: PlayerInput, armed_at: u64) -> Option<PlayerInput> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|b| b.input)
        } else {
            None
        };
        self.entries.push_back(BufferedInput { input, armed_at });
        evicted
    }

    /// Remove everything up to and including `sequence`; returns each
    /// removed input's latency
    fn acknowledge_through(&mut self, sequence: u64, now: u64) -> Vec<(u64, u64)> {
        let mut acked = Vec::new();
        while let Some(front) = self.entries.front() {
            if front.input.sequence > sequence {
                break;
            }
            if let Some(mut entry) = self.entries.pop_front() {
                entry.input.acknowledged = true;
                acked.push((entry.input.sequence, now.saturating_sub(entry.armed_at)));
            }
        }
        acked
    }

    /// Remove inputs whose ack timer ran out
    fn expire(&mut self, now: u64, timeout_ms: u64) -> Vec<PlayerInput> {
        let mut expired = Vec::new();
        self.entries.retain(|entry| {
            if entry.armed_at + timeout_ms <= now {
                expired.push(entry.input.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlayerInput> {
        self.entries.iter().map(|b| &b.input)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum AckOutcome {
    Acked { latency_ms: u64 },
    Dropped,
}

/// Per-player acknowledgment statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputStats {
    pub last_sequence: u64,
    pub pending: usize,
    pub acked_total: u64,
    pub dropped_total: u64,
    /// Inputs pushed out of a full buffer
    pub evicted_total: u64,
    /// Share of recent outcomes that were timeouts
    pub drop_rate: f32,
    pub avg_latency_ms: Option<f32>,
}

#[derive(Debug, Clone)]
struct PlayerChannel {
    last_sequence: u64,
    limiter: SlidingWindowLimiter,
    buffer: InputBuffer,
    recent: VecDeque<AckOutcome>,
    acked_total: u64,
    dropped_total: u64,
    evicted_total: u64,
}

impl PlayerChannel {
    fn new(config: &InputConfig) -> Self {
        Self {
            last_sequence: 0,
            limiter: SlidingWindowLimiter::new(config.rate_limit, config.rate_window_ms),
            buffer: InputBuffer::new(config.buffer_capacity),
            recent: VecDeque::with_capacity(config.stats_window),
            acked_total: 0,
            dropped_total: 0,
            evicted_total: 0,
        }
    }

    fn record(&mut self, outcome: AckOutcome, window: usize) {
        if self.recent.len() >= window.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome);
    }

    fn stats(&self) -> InputStats {
        let dropped = self
            .recent
            .iter()
            .filter(|o| matches!(o, AckOutcome::Dropped))
            .count();
        let latencies: Vec<u64> = self
            .recent
            .iter()
            .filter_map(|o| match o {
                AckOutcome::Acked { latency_ms } => Some(*latency_ms),
                AckOutcome::Dropped => None,
            })
            .collect();

        InputStats {
            last_sequence: self.last_sequence,
            pending: self.buffer.len(),
            acked_total: self.acked_total,
            dropped_total: self.dropped_total,
            evicted_total: self.evicted_total,
            drop_rate: if self.recent.is_empty() {
                0.0
            } else {
                dropped as f32 / self.recent.len() as f32
            },
            avg_latency_ms: if latencies.is_empty() {
                None
            } else {
                Some(latencies.iter().sum::<u64>() as f32 / latencies.len() as f32)
            },
        }
    }
}

/// Inputs that timed out during an [`InputSequencer::expire`] pass
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredInput {
    pub player_id: PlayerId,
    pub sequence: u64,
}

/// Assigns per-player sequence numbers and enforces the input rate cap
#[derive(Debug, Clone)]
pub struct InputSequencer {
    config: InputConfig,
    players: HashMap<PlayerId, PlayerChannel>,
    /// Added to local time when stamping inputs (client clock sync)
    clock_offset_ms: i64,
}

impl InputSequencer {
    pub fn new(config: InputConfig) -> Self {
        Self {
            config,
            players: HashMap::new(),
            clock_offset_ms: 0,
        }
    }

    pub fn register(&mut self, player_id: PlayerId) {
        let config = &self.config;
        self.players
            .entry(player_id)
            .or_insert_with(|| PlayerChannel::new(config));
    }

    pub fn remove(&mut self, player_id: &PlayerId) {
        self.players.remove(player_id);
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn set_clock_offset(&mut self, offset_ms: i64) {
        self.clock_offset_ms = offset_ms;
    }

    fn stamp(&self, now: u64) -> u64 {
        now.saturating_add_signed(self.clock_offset_ms)
    }

    /// Sequence a raw input as `last + 1`
    pub fn accept(
        &mut self,
        player_id: PlayerId,
        payload: InputPayload,
        now: u64,
    ) -> Result<PlayerInput, InputRejected> {
        let timestamp = self.stamp(now);
        let timeout = self.config.ack_timeout_ms;
        let channel = self
            .players
            .get_mut(&player_id)
            .ok_or(InputRejected::InvalidPlayerId(player_id))?;

        if !channel.limiter.try_acquire(now) {
            return Err(InputRejected::RateLimitExceeded);
        }

        channel.last_sequence += 1;
        let input = PlayerInput {
            player_id,
            sequence: channel.last_sequence,
            timestamp,
            input_type: payload.input_type(),
            payload,
            acknowledged: false,
            ack_timeout_ms: timeout,
        };
        if channel.buffer.push(input.clone(), now).is_some() {
            channel.evicted_total += 1;
        }
        Ok(input)
    }

    /// Accept an input that already carries the sender's sequence number.
    ///
    /// The sequence must be past the last one seen for the player; gaps are
    /// allowed since the sender may have lost inputs to its own limits.
    pub fn accept_sequenced(
        &mut self,
        mut input: PlayerInput,
        now: u64,
    ) -> Result<PlayerInput, InputRejected> {
        let timeout = self.config.ack_timeout_ms;
        let channel = self
            .players
            .get_mut(&input.player_id)
            .ok_or(InputRejected::InvalidPlayerId(input.player_id))?;

        if input.sequence <= channel.last_sequence {
            return Err(InputRejected::StaleSequence {
                last: channel.last_sequence,
                got: input.sequence,
            });
        }
        if !channel.limiter.try_acquire(now) {
            return Err(InputRejected::RateLimitExceeded);
        }

        channel.last_sequence = input.sequence;
        input.input_type = input.payload.input_type();
        input.acknowledged = false;
        input.ack_timeout_ms = timeout;
        if channel.buffer.push(input.clone(), now).is_some() {
            channel.evicted_total += 1;
        }
        Ok(input)
    }

    /// Cumulative acknowledgment: everything up to `sequence` is confirmed.
    /// Returns how many buffered inputs were released.
    pub fn acknowledge(&mut self, player_id: &PlayerId, sequence: u64, now: u64) -> usize {
        let window = self.config.stats_window;
        let Some(channel) = self.players.get_mut(player_id) else {
            return 0;
        };
        let acked = channel.buffer.acknowledge_through(sequence, now);
        for (_, latency_ms) in &acked {
            channel.record(AckOutcome::Acked { latency_ms: *latency_ms }, window);
        }
        channel.acked_total += acked.len() as u64;
        acked.len()
    }

    /// Purge inputs whose ack timer expired, counting them as dropped
    pub fn expire(&mut self, now: u64) -> Vec<ExpiredInput> {
        let timeout = self.config.ack_timeout_ms;
        let window = self.config.stats_window;
        let mut expired = Vec::new();
        for (player_id, channel) in self.players.iter_mut() {
            for input in channel.buffer.expire(now, timeout) {
                channel.record(AckOutcome::Dropped, window);
                channel.dropped_total += 1;
                expired.push(ExpiredInput {
                    player_id: *player_id,
                    sequence: input.sequence,
                });
            }
        }
        expired.sort_by_key(|e| (e.player_id, e.sequence));
        expired
    }

    /// Unacknowledged inputs, oldest first
    pub fn pending(&self, player_id: &PlayerId) -> Vec<PlayerInput> {
        self.players
            .get(player_id)
            .map(|c| c.buffer.pending().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, player_id: &PlayerId) -> Option<InputStats> {
        self.players.get(player_id).map(PlayerChannel::stats)
    }

    pub fn last_sequence(&self, player_id: &PlayerId) -> Option<u64> {
        self.players.get(player_id).map(|c| c.last_sequence)
    }

    /// Move the counter up to a sequence the other side assigned
    pub fn fast_forward(&mut self, player_id: &PlayerId, sequence: u64) {
        if let Some(channel) = self.players.get_mut(player_id) {
            channel.last_sequence = channel.last_sequence.max(sequence);
        }
    }

    /// Forget pending inputs without counting them as dropped.
    /// Sequence numbers keep counting up.
    pub fn clear_pending(&mut self, player_id: &PlayerId) {
        if let Some(channel) = self.players.get_mut(player_id) {
            channel.buffer.clear();
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }
}
