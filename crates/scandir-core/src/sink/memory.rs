//! Bounded FIFO of recent result records.

use std::collections::VecDeque;

use crate::model::ResultRecord;

/// The in-memory half of the result log. Not synchronized; `ResultLog` owns
/// it inside its critical section.
#[derive(Debug, Default)]
pub(crate) struct MemoryLog {
    records: VecDeque<ResultRecord>,
    capacity: usize,
    /// Set on the first eviction, cleared by `clear` or a capacity change.
    full: bool,
}

impl MemoryLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(4_096)),
            capacity,
            full: false,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `record`, evicting the oldest entries while at capacity.
    ///
    /// Returns `true` only on the transition into the full state, so the
    /// caller reports it once until the next `clear`.
    pub(crate) fn push(&mut self, record: ResultRecord) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut became_full = false;
        while self.records.len() >= self.capacity {
            self.records.pop_front();
            if !self.full {
                self.full = true;
                became_full = true;
            }
        }
        self.records.push_back(record);
        became_full
    }

    /// Change capacity, dropping the oldest records if the log is now over it.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        let excess = self.records.len().saturating_sub(capacity);
        self.records.drain(..excess);
        self.full = false;
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.full = false;
    }

    pub(crate) fn snapshot(&self) -> Vec<ResultRecord> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
