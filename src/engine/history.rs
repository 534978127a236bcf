//! Bounded round history, newest first.

use serde::{Deserialize, Serialize};

use crate::types::PredictionRecord;

/// Rounds kept for prediction.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundHistory {
    capacity: usize,
    records: Vec<PredictionRecord>,
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl RoundHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Vec::with_capacity(capacity + 1),
        }
    }

    /// Record a settled round at the head, evicting the oldest on overflow.
    pub fn push(&mut self, record: PredictionRecord) {
        self.records.insert(0, record);
        self.records.truncate(self.capacity);
    }

    /// All records, newest first.
    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    pub fn newest(&self) -> Option<&PredictionRecord> {
        self.records.first()
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

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
