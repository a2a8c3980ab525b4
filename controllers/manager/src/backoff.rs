//! # Fibonacci Backoff
//!
//! Per-object retry delays for failed reconciliations. The delay grows along
//! the Fibonacci sequence, which backs off more gently than doubling while
//! still getting out of the way of a resource that keeps failing.
//!
//! Sequence with the manager defaults: 5s, 5s, 10s, 15s, 25s, 40s, 65s,
//! 105s, 170s, 275s, 300s (max).
//!
//! [`BackoffTable`] keeps one sequence per failing object and forgets it on
//! the first success, so pods that come and go leave nothing behind.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum delay in seconds (for reset)
    min_secs: u64,
    /// Previous delay in seconds
    prev_secs: u64,
    /// Current delay in seconds
    current_secs: u64,
    /// Maximum delay in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_secs` and capped at `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Returns the current delay in seconds and advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        result
    }

    /// Returns the current delay and advances the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }
}

/// Backoff state for a single resource
#[derive(Debug)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Backoff states of failing resources, keyed by `namespace/name`.
#[derive(Debug)]
pub struct BackoffTable {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTable {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Counts a failed reconciliation of `key`
    pub fn increment_error(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| BackoffState {
                backoff: FibonacciBackoff::new(self.min_secs, self.max_secs),
                error_count: 0,
            })
            .error_count += 1;
    }

    /// Next delay for `key` and its error count; advances the sequence
    pub fn next_backoff(&self, key: &str) -> (Duration, u32) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
            backoff: FibonacciBackoff::new(self.min_secs, self.max_secs),
            error_count: 0,
        });
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forgets `key` after a successful reconciliation
    pub fn reset(&self, key: &str) {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        let seq: Vec<u64> = (0..11).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seq, vec![5, 5, 10, 15, 25, 40, 65, 105, 170, 275, 300]);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        for _ in 0..6 {
            backoff.next_backoff_seconds();
        }
        // 1, 1, 2, 3, 5, 8 consumed; 13 is capped
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_table_grows_per_key_and_forgets_on_success() {
        let table = BackoffTable::new(5, 300);
        table.increment_error("ns/pod-a");
        assert_eq!(table.next_backoff("ns/pod-a"), (Duration::from_secs(5), 1));
        table.increment_error("ns/pod-a");
        assert_eq!(table.next_backoff("ns/pod-a"), (Duration::from_secs(5), 2));
        table.increment_error("ns/pod-a");
        assert_eq!(table.next_backoff("ns/pod-a"), (Duration::from_secs(10), 3));

        table.increment_error("ns/pod-b");
        assert_eq!(table.len(), 2);

        table.reset("ns/pod-a");
        table.reset("ns/pod-b");
        table.reset("ns/never-failed");
        assert_eq!(table.len(), 0);

        // a later failure starts the sequence over
        table.increment_error("ns/pod-a");
        assert_eq!(table.next_backoff("ns/pod-a"), (Duration::from_secs(5), 1));
    }
}
