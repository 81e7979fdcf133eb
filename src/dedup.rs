//! Bounded recency cache of uplink signatures

use std::collections::{HashSet, VecDeque};

pub const DEFAULT_CAPACITY: usize = 100;

/// FIFO set of the most recent `capacity` signatures
#[derive(Debug, Clone)]
pub struct Deduplicator {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl Deduplicator {
    /// A capacity of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn seen(&self, signature: &str) -> bool {
        self.members.contains(signature)
    }

    /// Insert, evicting the oldest entry at capacity; already-present signatures are left
    /// where they are
    pub fn record(&mut self, signature: &str) {
        if self.members.contains(signature) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(signature.to_string());
        self.members.insert(signature.to_string());
    }

    /// Returns `true` if the signature was new (and records it)
    pub fn check_and_record(&mut self, signature: &str) -> bool {
        if self.seen(signature) {
            return false;
        }
        self.record(signature);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_after_capacity_plus_one() {
        let mut dedup = Deduplicator::default();
        for i in 0..=DEFAULT_CAPACITY {
            dedup.record(&format!("sig-{}", i));
        }
        assert_eq!(dedup.len(), DEFAULT_CAPACITY);
        assert!(!dedup.seen("sig-0"));
        assert!(dedup.seen("sig-1"));
        assert!(dedup.seen(&format!("sig-{}", DEFAULT_CAPACITY)));

        // Evicted signature counts as new again
        assert!(dedup.check_and_record("sig-0"));
        assert!(!dedup.seen("sig-1"));
    }

    #[test]
    fn test_check_and_record() {
        let mut dedup = Deduplicator::new(2);
        assert!(dedup.check_and_record("a"));
        assert!(!dedup.check_and_record("a"));
        assert!(dedup.check_and_record("b"));
        assert!(dedup.check_and_record("c"));
        assert!(!dedup.seen("a"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_rerecord_is_noop() {
        let mut dedup = Deduplicator::new(2);
        dedup.record("a");
        dedup.record("a");
        dedup.record("b");
        assert_eq!(dedup.len(), 2);
        assert!(dedup.seen("a") && dedup.seen("b"));
        assert_eq!(Deduplicator::new(0).capacity(), 1);
    }
}
