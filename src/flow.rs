//! Outbound flow control: sliding-window rate limiting and the bounded
//! message queue.
//!
//! The rate limiter gates sends against a trailing window; over-budget
//! messages are queued rather than dropped. The queue itself is bounded:
//! past capacity, new entries are dropped with a warning, trading
//! completeness for bounded memory under sustained disconnection.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// Hard cap on recorded send timestamps, independent of window trimming.
const WINDOW_HARD_CAP: usize = 1000;

/// Number of most-recent timestamps retained when the hard cap is hit.
const WINDOW_TRUNCATE_TO: usize = 500;

// ============================================================================
// RateLimiter
// ============================================================================

/// Sliding-window counter gating outbound message rate.
///
/// A send is admitted when fewer than `limit` sends occurred within the
/// trailing `window`. Timestamps are trimmed on every check; a hard cap
/// bounds the record even if the window check were bypassed.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum sends per window.
    limit: usize,
    /// Sliding window duration.
    window: Duration,
    /// Send timestamps within the window, oldest first.
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` sends per `window`.
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Attempts to admit a send now.
    #[inline]
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Attempts to admit a send at the given instant.
    ///
    /// Returns `true` and records the timestamp when under budget;
    /// returns `false` when at or over budget.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.trim(now);

        if self.timestamps.len() >= self.limit {
            trace!(
                in_window = self.timestamps.len(),
                limit = self.limit,
                "Rate limit reached"
            );
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    /// Returns the number of sends currently inside the window.
    #[must_use]
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.trim(now);
        self.timestamps.len()
    }

    /// Drops timestamps outside the window, then enforces the hard cap.
    fn trim(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.len() > WINDOW_HARD_CAP {
            let excess = self.timestamps.len() - WINDOW_TRUNCATE_TO;
            warn!(
                len = self.timestamps.len(),
                "Rate window exceeded hard cap, truncating"
            );
            self.timestamps.drain(..excess);
        }
    }
}

// ============================================================================
// MessageQueue
// ============================================================================

/// Bounded FIFO of outbound messages awaiting transport availability or
/// rate-limit clearance.
#[derive(Debug)]
pub struct MessageQueue {
    /// Queued payloads, oldest first.
    items: VecDeque<Value>,
    /// Maximum retained messages.
    capacity: usize,
}

impl MessageQueue {
    /// Creates a queue with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Enqueues a message.
    ///
    /// Returns `true` if retained. At capacity the NEW message is dropped
    /// (not the oldest) and `false` is returned, with a logged warning.
    pub fn push(&mut self, payload: Value) -> bool {
        if self.items.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                "Message queue full, dropping new message"
            );
            return false;
        }

        self.items.push_back(payload);
        true
    }

    /// Removes and returns the oldest queued message.
    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    /// Removes and returns up to `batch` oldest messages.
    #[must_use]
    pub fn drain_batch(&mut self, batch: usize) -> Vec<Value> {
        let take = batch.min(self.items.len());
        self.items.drain(..take).collect()
    }

    /// Returns the number of queued messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops all queued messages.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
