use std::collections::VecDeque;

use tiering_domain::switching::SwitchRecord;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Ring buffer of switch outcomes; the oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct SwitchHistory {
    capacity: usize,
    records: VecDeque<SwitchRecord>,
}

impl SwitchHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: SwitchRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<SwitchRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&SwitchRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SwitchHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
