//! In-memory ring buffer of recent permission checks

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::now_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// The permission string exactly as the caller passed it.
    pub permission: String,
    pub result: bool,
    /// `None` when the check ran without an authenticated user.
    pub user_id: Option<String>,
    pub timestamp: u64,
    pub cached: bool,
}

/// Oldest records are evicted first once `capacity` is reached.
/// `None` capacity keeps everything until [`AuditLog::clear`].
#[derive(Debug, Default)]
pub struct AuditLog {
    records: VecDeque<AuditRecord>,
    capacity: Option<usize>,
}

impl AuditLog {
    pub fn new(capacity: Option<usize>) -> Self {
        AuditLog { records: VecDeque::new(), capacity }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn record(&mut self, permission: &str, result: bool, user_id: Option<&str>, cached: bool) {
        if self.capacity == Some(0) {
            return;
        }
        if let Some(cap) = self.capacity {
            while self.records.len() >= cap {
                self.records.pop_front();
            }
        }
        self.records.push_back(AuditRecord {
            permission: permission.to_string(),
            result,
            user_id: user_id.map(str::to_string),
            timestamp: now_millis(),
            cached,
        });
    }

    /// The latest `limit` records (all when `None`), most recent last.
    pub fn recent(&self, limit: Option<usize>) -> Vec<AuditRecord> {
        let n = limit.unwrap_or(self.records.len()).min(self.records.len());
        self.records.iter().skip(self.records.len() - n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
