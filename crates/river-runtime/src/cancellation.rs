//! Cancellation marks for queued requests
//!
//! A mark applies to the next dispatch attempt of a request only: the
//! distributor consumes it when it skips the request.

use std::collections::HashSet;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct CancellationSet {
    marked: Mutex<HashSet<u64>>,
}

impl CancellationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request so its next dispatch attempt is skipped
    pub fn cancel_next_attempt(&self, request_id: u64) {
        self.marked.lock().insert(request_id);
    }

    /// Consume the mark; returns whether the request was marked
    pub fn take(&self, request_id: u64) -> bool {
        self.marked.lock().remove(&request_id)
    }

    /// Check without consuming, for diagnostics
    pub fn is_marked(&self, request_id: u64) -> bool {
        self.marked.lock().contains(&request_id)
    }

    pub fn len(&self) -> usize {
        self.marked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_consumed_once() {
        let set = CancellationSet::new();
        set.cancel_next_attempt(7);
        set.cancel_next_attempt(7);

        assert!(set.is_marked(7));
        assert!(set.take(7));
        assert!(!set.take(7));
        assert!(set.is_empty());
    }

    #[test]
    fn test_unmarked_request_is_not_cancelled() {
        let set = CancellationSet::new();
        set.cancel_next_attempt(1);
        assert!(!set.take(2));
        assert_eq!(set.len(), 1);
    }
}
