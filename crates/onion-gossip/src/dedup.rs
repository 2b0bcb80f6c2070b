//! Bounded memory of already-processed envelope ids.

use std::collections::{HashSet, VecDeque};

/// Default number of ids remembered.
pub const DEFAULT_DEDUP_CAPACITY: usize = 2_000;

/// A capacity-bounded set of seen ids with strict FIFO eviction.
///
/// Re-marking an id that is already present does not move it to the back of the queue,
/// so an id seen many times is evicted exactly as early as one seen once. Once evicted,
/// an id is accepted again.
#[derive(Debug, Clone)]
pub struct SeenSet {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenSet {
    /// Creates an empty set that holds at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns true if `id` has been seen and not yet evicted.
    #[must_use]
    pub fn is_duplicate(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Records `id`, returning `false` if it was already present.
    ///
    /// Inserting past capacity evicts the single oldest id.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }

        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());

        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    /// Returns the number of ids currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no ids are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
