use crate::models::{Decision, DecisionStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;

const LOG_CAPACITY: usize = 1000;

/// Filter for log queries. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub status: Option<DecisionStatus>,
    pub source_wallet: Option<String>,
    pub condition_id: Option<String>,
}

/// Bounded ring buffer of copy-trade decisions.
pub struct LogStore {
    entries: Mutex<VecDeque<Decision>>,
    capacity: usize,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn insert(&self, decision: Decision) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(decision);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<Decision> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Filtered scan, newest first. The buffer is bounded, so O(n) is fine.
    pub fn query(&self, filter: &LogFilter, limit: usize) -> Vec<Decision> {
        let wallet = filter.source_wallet.as_ref().map(|w| w.to_lowercase());
        let condition = filter.condition_id.as_ref().map(|c| c.to_lowercase());
        let entries = self.entries.lock();
        entries
            .iter()
            .rev()
            .filter(|d| {
                filter.status.map_or(true, |s| d.status == s)
                    && wallet
                        .as_ref()
                        .map_or(true, |w| d.source_wallet.to_lowercase() == *w)
                    && condition
                        .as_ref()
                        .map_or(true, |c| d.condition_id.to_lowercase() == *c)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Oldest-first snapshot of the whole buffer.
    pub fn snapshot(&self) -> Vec<Decision> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
