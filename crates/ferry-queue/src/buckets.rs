//! Priority buckets.
//!
//! One FIFO per priority level. Admission scans them in
//! [`Priority::SCAN_ORDER`]; an id lives in at most one bucket.

use std::collections::VecDeque;

use ferry_core::{Priority, TransferId};

/// Three FIFO lists of queued transfer ids, one per priority.
#[derive(Debug, Default)]
pub struct PriorityBuckets {
    buckets: [VecDeque<TransferId>; 3],
}

impl PriorityBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id to the tail of its bucket.
    pub fn push_back(&mut self, id: TransferId, priority: Priority) {
        self.buckets[priority.index()].push_back(id);
    }

    /// Remove an id from whichever bucket holds it.
    ///
    /// Returns the priority of the bucket it was found in.
    pub fn remove(&mut self, id: &TransferId) -> Option<Priority> {
        for priority in Priority::SCAN_ORDER {
            let bucket = &mut self.buckets[priority.index()];
            if let Some(pos) = bucket.iter().position(|queued| queued == id) {
                bucket.remove(pos);
                return Some(priority);
            }
        }
        None
    }

    /// Remove the id at `pos` in the given bucket.
    pub fn take_at(&mut self, priority: Priority, pos: usize) -> Option<TransferId> {
        self.buckets[priority.index()].remove(pos)
    }

    pub fn bucket(&self, priority: Priority) -> &VecDeque<TransferId> {
        &self.buckets[priority.index()]
    }

    /// Which bucket holds `id`, if any.
    #[cfg(test)]
    pub fn find(&self, id: &TransferId) -> Option<Priority> {
        Priority::SCAN_ORDER
            .into_iter()
            .find(|p| self.buckets[p.index()].contains(id))
    }

    /// Total ids across all buckets.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    /// All ids in admission scan order.
    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (Priority, &TransferId)> {
        Priority::SCAN_ORDER
            .into_iter()
            .flat_map(move |p| self.buckets[p.index()].iter().map(move |id| (p, id)))
    }
}
