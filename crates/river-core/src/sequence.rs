//! Sequential unique identifiers
//!
//! IDs are the wall clock in nanoseconds plus a small atomic tie-breaker, so
//! requests created within the same nanosecond still differ. This is
//! best-effort uniqueness, not an ordering guarantee: clock adjustments can
//! move IDs backwards.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counter value after which the tie-breaker wraps back to zero
pub const COUNTER_RESET_THRESHOLD: i64 = 16384;

/// Generator of time-based request identifiers
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    counter: AtomicI64,
}

impl SequenceIdGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicI64::new(0),
        }
    }

    /// Next identifier: `now_nanos + counter`
    pub fn next(&self) -> i64 {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();

        if counter > COUNTER_RESET_THRESHOLD {
            self.counter.store(0, Ordering::SeqCst);
        }
        nanos.wrapping_add(counter)
    }

    /// Next identifier as an unsigned request id
    pub fn next_request_id(&self) -> u64 {
        self.next() as u64
    }
}

static GLOBAL_SEQUENCE: SequenceIdGenerator = SequenceIdGenerator::new();

/// Process-wide [`SequenceIdGenerator::next`]
pub fn sequential_unique_id() -> i64 {
    GLOBAL_SEQUENCE.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_distinct_in_tight_loop() {
        let generator = SequenceIdGenerator::new();
        let ids: HashSet<i64> = (0..1_000).map(|_| generator.next()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn test_counter_wraps_after_threshold() {
        let generator = SequenceIdGenerator::new();
        for _ in 0..=COUNTER_RESET_THRESHOLD {
            generator.next();
        }
        assert_eq!(generator.counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ids_track_wall_clock() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as i64;
        let id = sequential_unique_id();
        assert!(id > before);
        assert!(id - before < 60_000_000_000);
    }
}
