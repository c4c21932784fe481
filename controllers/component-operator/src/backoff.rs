//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciliations grow along the Fibonacci
//! sequence in minutes: 1m, 1m, 2m, 3m, 5m, 8m, then capped at 10m.
//! [`BackoffTracker`] keeps one sequence per object key and restarts it on
//! the first successful reconcile.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const MIN_MINUTES: u64 = 1;
const MAX_MINUTES: u64 = 10;

/// Fibonacci backoff calculator, in whole minutes
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Sequence starting at `min_minutes` and capped at `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Returns the current delay and advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.max_minutes);
        delay
    }

    /// Restarts the sequence
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(MIN_MINUTES, MAX_MINUTES)
    }
}

/// Per-object backoff state (key -> sequence)
#[derive(Debug, Default)]
pub struct BackoffTracker {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffTracker {
    /// Next requeue delay for `key`
    pub fn next(&self, key: &str) -> Duration {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .next_backoff()
    }

    /// Forgets the failures of `key`
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(d: Duration) -> u64 {
        d.as_secs() / 60
    }

    #[test]
    fn test_fibonacci_backoff_sequence_caps_at_ten_minutes() {
        let mut backoff = FibonacciBackoff::default();
        let sequence: Vec<u64> = (0..9).map(|_| minutes(backoff.next_backoff())).collect();
        assert_eq!(sequence, vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();
        for _ in 0..4 {
            backoff.next_backoff();
        }
        backoff.reset();
        assert_eq!(minutes(backoff.next_backoff()), 1);
        assert_eq!(minutes(backoff.next_backoff()), 1);
        assert_eq!(minutes(backoff.next_backoff()), 2);
    }

    #[test]
    fn test_tracker_keeps_sequences_per_key() {
        let tracker = BackoffTracker::default();
        tracker.next("default/a");
        tracker.next("default/a");
        assert_eq!(minutes(tracker.next("default/a")), 2);
        assert_eq!(minutes(tracker.next("default/b")), 1);

        tracker.reset("default/a");
        assert_eq!(minutes(tracker.next("default/a")), 1);
    }
}
