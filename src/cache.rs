//! Per-session memo of permission check results
//!
//! Entries are derived data: dropping any of them changes only how often the
//! evaluator runs, never what it answers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::now_millis;
use crate::permission::{parse_permission_string, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub result: bool,
    pub timestamp: u64,
}

/// Observability counters. Never consulted for correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub cache_hits: u64,
    pub total_checks: u64,
    pub cache_size: usize,
}

impl CacheMetrics {
    /// Fraction of checks served from cache, `0.0` before any check.
    pub fn hit_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_checks as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: HashMap<String, CacheEntry>,
    cache_hits: u64,
    total_checks: u64,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a check and return the cached result, if any.
    pub fn lookup(&mut self, key: &str) -> Option<bool> {
        self.total_checks += 1;
        let hit = self.entries.get(key).map(|e| e.result);
        if hit.is_some() {
            self.cache_hits += 1;
        }
        hit
    }

    /// Peek without touching counters.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, result: bool) {
        let entry = CacheEntry { key: key.clone(), result, timestamp: now_millis() };
        self.entries.insert(key, entry);
    }

    /// Count a check that bypassed the lookup path (prefetch, disabled cache).
    pub fn count_check(&mut self) {
        self.total_checks += 1;
    }

    /// Remove every entry cached for `permission`, under any context and
    /// under either spelling of an `any` scope. Returns the number removed.
    pub fn invalidate(&mut self, permission: &str) -> usize {
        let spellings = spellings(permission);
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !spellings.iter().any(|p| keyed_under(k, p)));
        before - self.entries.len()
    }

    /// Empty the cache and reset both counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cache_hits = 0;
        self.total_checks = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            cache_hits: self.cache_hits,
            total_checks: self.total_checks,
            cache_size: self.entries.len(),
        }
    }
}

/// Keys are the permission followed by the context JSON, which is either
/// `null` or an object.
fn keyed_under(key: &str, permission: &str) -> bool {
    key.strip_prefix(permission)
        .map(|rest| rest == "null" || rest.starts_with('{'))
        .unwrap_or(false)
}

fn spellings(permission: &str) -> Vec<String> {
    match parse_permission_string(permission) {
        Some(p) if p.scope() == Scope::Any => {
            vec![format!("{}:{}", p.resource(), p.action()), p.to_string()]
        }
        Some(p) => vec![p.to_string()],
        None => vec![permission.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_counts_hits_and_misses() {
        let mut c = PermissionCache::new();
        assert_eq!(c.lookup("a"), None);
        c.insert("a".into(), true);
        assert_eq!(c.lookup("a"), Some(true));
        let m = c.metrics();
        assert_eq!((m.cache_hits, m.total_checks, m.cache_size), (1, 2, 1));
        assert_eq!(m.hit_rate(), 0.5);
    }

    #[test]
    fn invalidate_by_prefix() {
        let mut c = PermissionCache::new();
        c.insert("property:readnull".into(), true);
        c.insert(r#"property:read{"ownerId":"u"}"#.into(), true);
        c.insert("user:createnull".into(), false);
        assert_eq!(c.invalidate("property:read"), 2);
        assert!(c.get("user:createnull").is_some());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn invalidate_matches_whole_permission() {
        let mut c = PermissionCache::new();
        c.insert("property:readnull".into(), true);
        c.insert("property:readAllnull".into(), true);
        c.insert("property:read:minenull".into(), false);
        assert_eq!(c.invalidate("property:read"), 1);
        assert!(c.get("property:readAllnull").is_some());
        assert!(c.get("property:read:minenull").is_some());
    }

    #[test]
    fn invalidate_covers_both_any_spellings() {
        let mut c = PermissionCache::new();
        c.insert("property:readnull".into(), true);
        c.insert(r#"property:read:any{"ownerId":"u"}"#.into(), true);
        assert_eq!(c.invalidate("property:read:any"), 2);
        assert!(c.is_empty());
    }

    #[test]
    fn invalidate_malformed_is_literal() {
        let mut c = PermissionCache::new();
        c.insert("badnull".into(), false);
        assert_eq!(c.invalidate("bad"), 1);
    }

    #[test]
    fn clear_resets_counters() {
        let mut c = PermissionCache::new();
        c.insert("k".into(), true);
        c.lookup("k");
        c.count_check();
        c.clear();
        assert_eq!(c.metrics(), CacheMetrics::default());
        assert_eq!(CacheMetrics::default().hit_rate(), 0.0);
    }
}
