use crate::models::{Alert, AlertKind, AlertPriority};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

const ALERT_CAPACITY: usize = 500;

/// Bounded ring buffer of typed notifications.
pub struct AlertStore {
    entries: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self::with_capacity(ALERT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Build and insert an alert, returning its id.
    pub fn emit(
        &self,
        kind: AlertKind,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
        condition_id: Option<String>,
        position_id: Option<String>,
        decision_id: Option<String>,
    ) -> String {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            kind,
            priority,
            title: title.into(),
            message: message.into(),
            condition_id,
            position_id,
            decision_id,
            created_at: Utc::now(),
            read: false,
            dismissed: false,
        };
        let id = alert.id.clone();
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(alert);
        id
    }

    /// Newest first, dismissed alerts excluded.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let entries = self.entries.lock();
        entries
            .iter()
            .rev()
            .filter(|a| !a.dismissed)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) -> usize {
        let mut entries = self.entries.lock();
        let mut updated = 0;
        for alert in entries.iter_mut().filter(|a| !a.read) {
            alert.read = true;
            updated += 1;
        }
        updated
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.dismissed = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_count(&self) -> usize {
        let entries = self.entries.lock();
        entries.iter().filter(|a| !a.read && !a.dismissed).count()
    }

    pub fn counts_by_priority(&self) -> HashMap<AlertPriority, usize> {
        let entries = self.entries.lock();
        let mut counts = HashMap::new();
        for alert in entries.iter().filter(|a| !a.dismissed) {
            *counts.entry(alert.priority).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
