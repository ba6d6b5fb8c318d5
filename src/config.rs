//! Session configuration

use crate::error::{PermError, Result};

pub const ENV_CACHE: &str = "SCOPEPERM_CACHE";
pub const ENV_AUDIT: &str = "SCOPEPERM_AUDIT";
pub const ENV_AUDIT_CAPACITY: &str = "SCOPEPERM_AUDIT_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionsConfig {
    /// Memoize check results per session.
    pub cache_enabled: bool,
    /// Record every `has_permission` call.
    pub audit_enabled: bool,
    /// Ring buffer size; `None` is unbounded.
    pub audit_capacity: Option<usize>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            audit_enabled: true,
            audit_capacity: None,
        }
    }
}

impl PermissionsConfig {
    /// Defaults overridden by `SCOPEPERM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = get(ENV_CACHE) {
            cfg.cache_enabled = parse_bool(ENV_CACHE, &v)?;
        }
        if let Some(v) = get(ENV_AUDIT) {
            cfg.audit_enabled = parse_bool(ENV_AUDIT, &v)?;
        }
        if let Some(v) = get(ENV_AUDIT_CAPACITY) {
            let v = v.trim();
            cfg.audit_capacity = if v.is_empty() || v.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(v.parse().map_err(|_| {
                    PermError::Config(format!("{} must be a number, got '{}'", ENV_AUDIT_CAPACITY, v))
                })?)
            };
        }
        Ok(cfg)
    }

    pub fn audit_capacity(mut self, capacity: Option<usize>) -> Self {
        self.audit_capacity = capacity;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }
}

fn parse_bool(name: &str, v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(PermError::Config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}
