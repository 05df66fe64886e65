//! Exponential backoff for reconnection timing.
//!
//! The first attempt is immediate (zero delay): a dropped connection is
//! most often transient, e.g. a server restart or network blip, and an
//! instant retry usually succeeds. Subsequent attempts double from the
//! base delay up to a cap, with bounded jitter to avoid synchronized
//! retry storms across many clients.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// ExponentialBackoff
// ============================================================================

/// Exponential backoff schedule with jitter.
///
/// Delay for attempt `n` (1-based):
///
/// - `n == 1`: zero, when `immediate_first` is set
/// - otherwise: `min(base * 2^k + jitter, max)`, where `k` counts from
///   zero at the first *delayed* attempt
///
/// With `immediate_first` the sequence is `0, base, 2*base, 4*base, ...`;
/// without it, `base, 2*base, 4*base, ...`.
///
/// The jitter source is the wall clock's subsecond nanoseconds, which is
/// cheap and unsynchronized across processes.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Base delay before doubling.
    base: Duration,
    /// Cap on the computed delay.
    max: Duration,
    /// Upper bound on added jitter.
    jitter_max: Duration,
    /// Whether the first attempt is immediate.
    immediate_first: bool,
    /// Attempts issued since the last reset.
    attempt: u32,
}

impl ExponentialBackoff {
    /// Creates a backoff schedule.
    #[must_use]
    pub const fn new(
        base: Duration,
        max: Duration,
        jitter_max: Duration,
        immediate_first: bool,
    ) -> Self {
        Self {
            base,
            max,
            jitter_max,
            immediate_first,
            attempt: 0,
        }
    }

    /// Returns the delay for the next attempt and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        if self.attempt == 1 && self.immediate_first {
            return Duration::ZERO;
        }

        // Exponent counts from the first delayed attempt.
        let exp = if self.immediate_first {
            self.attempt - 2
        } else {
            self.attempt - 1
        };

        let scaled = self
            .base
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        let delay = scaled.saturating_add(self.jitter());

        delay.min(self.max)
    }

    /// Returns the number of attempts issued since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resets the schedule after a successful connection.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Bounded jitter derived from wall-clock subsecond nanos.
    fn jitter(&self) -> Duration {
        let bound = self.jitter_max.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;

        Duration::from_millis(nanos % bound)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, max_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            Duration::ZERO,
            true,
        )
    }

    #[test]
    fn test_first_attempt_immediate() {
        let mut backoff = no_jitter(1000, 30_000);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn test_doubling_sequence() {
        let mut backoff = no_jitter(1000, 30_000);
        backoff.next_delay(); // attempt 1: immediate

        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(8000));
    }

    #[test]
    fn test_monotone_and_capped() {
        let max = Duration::from_millis(5000);
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            max,
            Duration::from_millis(50),
            true,
        );
        backoff.next_delay(); // immediate first

        let mut prev = Duration::ZERO;
        for _ in 0..40 {
            let delay = backoff.next_delay();
            assert!(delay <= max);
            // Non-decreasing up to the cap; jitter is bounded by 50ms which
            // is below the doubling step at every uncapped attempt.
            assert!(delay >= prev.min(max - Duration::from_millis(50)));
            prev = delay;
        }
        assert_eq!(prev, max);
    }

    #[test]
    fn test_no_overflow_at_high_attempts() {
        let mut backoff = no_jitter(1000, 60_000);
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_millis(60_000));
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = no_jitter(1000, 30_000);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_without_immediate_first() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(200),
            Duration::from_secs(10),
            Duration::ZERO,
            false,
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_bounded() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(1000),
            Duration::from_secs(60),
            Duration::from_millis(300),
            true,
        );
        backoff.next_delay(); // immediate first

        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay < Duration::from_millis(1300));
    }
}
