//! Adaptive tick scheduling and outbound batching
//!
//! Both types only compare timestamps handed to them; the async driver owns
//! the actual timers.

use crate::config::SchedulerConfig;
use crate::ws::protocol::Outbound;

/// Decides when the next simulation tick is due
#[derive(Debug, Clone)]
pub struct TickScheduler {
    config: SchedulerConfig,
    next_due_ms: Option<u64>,
    last_interval_ms: u64,
}

impl TickScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let last_interval_ms = config.base_interval_ms;
        Self {
            config,
            next_due_ms: None,
            last_interval_ms,
        }
    }

    /// Heavier games tick less often instead of jittering
    pub fn interval_for(&self, players: usize, entities: usize) -> u64 {
        let c = &self.config;
        let raw = c.base_interval_ms
            + c.per_player_ms * players as u64
            + entities as u64 / c.entities_per_ms.max(1);
        raw.clamp(c.min_interval_ms, c.max_interval_ms.max(c.min_interval_ms))
    }

    /// True before the first tick and once the deadline has passed
    pub fn due(&self, now_ms: u64) -> bool {
        self.next_due_ms.map_or(true, |due| now_ms >= due)
    }

    /// Set the next deadline from the current load; returns it
    pub fn schedule_next(&mut self, now_ms: u64, players: usize, entities: usize) -> u64 {
        self.last_interval_ms = self.interval_for(players, entities);
        let due = now_ms + self.last_interval_ms;
        self.next_due_ms = Some(due);
        due
    }

    pub fn next_due(&self) -> Option<u64> {
        self.next_due_ms
    }

    pub fn last_interval_ms(&self) -> u64 {
        self.last_interval_ms
    }

    pub fn time_until_due(&self, now_ms: u64) -> u64 {
        self.next_due_ms
            .map_or(0, |due| due.saturating_sub(now_ms))
    }
}

/// Messages released by a flush, plus whether a state send is owed
#[derive(Debug, Default, PartialEq)]
pub struct Batch {
    pub messages: Vec<Outbound>,
    pub include_state: bool,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && !self.include_state
    }
}

/// Coalesces state-changing events into one send per window.
///
/// The window opens on the first event and closes `delay` later; events in
/// between are merged into the same flush.
#[derive(Debug, Default)]
pub struct BroadcastBatcher {
    pending: Vec<Outbound>,
    state_dirty: bool,
    deadline_ms: Option<u64>,
    merged: u64,
}

impl BroadcastBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message. High-priority messages come straight back to be sent
    /// immediately.
    pub fn push(&mut self, out: Outbound, now_ms: u64, delay_ms: u64) -> Option<Outbound> {
        if out.msg.is_high_priority() {
            return Some(out);
        }
        self.pending.push(out);
        self.open(now_ms, delay_ms);
        None
    }

    /// Record that the board changed and a state send is owed
    pub fn mark_state_dirty(&mut self, now_ms: u64, delay_ms: u64) {
        self.state_dirty = true;
        self.open(now_ms, delay_ms);
    }

    fn open(&mut self, now_ms: u64, delay_ms: u64) {
        match self.deadline_ms {
            Some(_) => self.merged += 1,
            None => self.deadline_ms = Some(now_ms + delay_ms),
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Events folded into an already open window
    pub fn merged(&self) -> u64 {
        self.merged
    }

    /// Release everything once the window has closed
    pub fn flush(&mut self, now_ms: u64) -> Option<Batch> {
        match self.deadline_ms {
            Some(deadline) if now_ms >= deadline => Some(self.take()),
            _ => None,
        }
    }

    /// Release everything regardless of the window
    pub fn take(&mut self) -> Batch {
        self.deadline_ms = None;
        Batch {
            messages: std::mem::take(&mut self.pending),
            include_state: std::mem::take(&mut self.state_dirty),
        }
    }
}
