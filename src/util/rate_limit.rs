//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Flood guard for raw WebSocket frames, checked before any parsing.
///
/// Gameplay inputs are limited separately and exactly by
/// [`SlidingWindowLimiter`]; this only keeps a misbehaving socket from
/// burning CPU on deserialization.
#[derive(Clone)]
pub struct ConnectionGuard {
    frame_limiter: Arc<Limiter>,
}

impl ConnectionGuard {
    pub fn new(frames_per_second: u32) -> Self {
        Self {
            frame_limiter: create_limiter(frames_per_second),
        }
    }

    /// Check if a frame is allowed (returns true if allowed)
    pub fn check_frame(&self) -> bool {
        self.frame_limiter.check().is_ok()
    }
}

/// Exact sliding-window limiter over caller-supplied timestamps.
///
/// Admits at most `limit` events in any window of `window_ms`. Timestamps are
/// treated as non-decreasing; an earlier timestamp is pinned to the latest
/// one seen.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window_ms: u64,
    hits: VecDeque<u64>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms: window_ms.max(1),
            hits: VecDeque::with_capacity(limit),
        }
    }

    /// Record an event at `now_ms` if the window has room
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        let now_ms = self.hits.back().map_or(now_ms, |last| now_ms.max(*last));
        self.prune(now_ms);

        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now_ms);
        true
    }

    /// Drop timestamps that fell out of the window ending at `now_ms`
    pub fn prune(&mut self, now_ms: u64) {
        while let Some(oldest) = self.hits.front() {
            if oldest + self.window_ms <= now_ms {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn in_window(&self) -> usize {
        self.hits.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.hits.clear();
    }
}
