//! Per-session permission facade
//!
//! A [`Permissions`] value is built when a user logs in and dropped (or reset
//! via [`Permissions::logout`]) when they leave. It owns everything a check
//! touches: the granted set, the result cache, the audit log and the field
//! rules. Nothing here is global, so several sessions can live side by side.
//!
//! Checks never fail. Malformed strings, a missing user and broken rule
//! sources all resolve to a deny (or the caller's fallback).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::audit::{AuditLog, AuditRecord};
use crate::cache::{CacheMetrics, PermissionCache};
use crate::config::PermissionsConfig;
use crate::context::{cache_key, PermissionContext};
use crate::fields::{FieldAccess, FieldRuleTable, FieldRules};
use crate::permission::{create_permission_string, Scope};
use crate::scope::evaluate_str;
use crate::user::{CurrentUser, SessionContext};

/// One entry of a batch check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub permission: String,
    #[serde(default)]
    pub context: Option<PermissionContext>,
}

impl PermissionCheck {
    pub fn new(permission: impl Into<String>) -> Self {
        PermissionCheck { permission: permission.into(), context: None }
    }

    pub fn with_context(permission: impl Into<String>, context: PermissionContext) -> Self {
        PermissionCheck { permission: permission.into(), context: Some(context) }
    }
}

impl From<&str> for PermissionCheck {
    fn from(permission: &str) -> Self {
        PermissionCheck::new(permission)
    }
}

pub struct Permissions {
    user: Option<CurrentUser>,
    cache: PermissionCache,
    audit: AuditLog,
    rules: Box<dyn FieldRules>,
    config: PermissionsConfig,
}

impl std::fmt::Debug for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permissions")
            .field("user", &self.user.as_ref().map(|u| &u.sub))
            .field("cache_size", &self.cache.len())
            .field("audit_len", &self.audit.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::new(PermissionsConfig::default())
    }
}

impl Permissions {
    /// An unauthenticated session with the property-management field rules.
    pub fn new(config: PermissionsConfig) -> Self {
        Permissions {
            user: None,
            cache: PermissionCache::new(),
            audit: AuditLog::new(config.audit_capacity),
            rules: Box::new(FieldRuleTable::property_defaults()),
            config,
        }
    }

    pub fn with_user(user: CurrentUser, config: PermissionsConfig) -> Self {
        let mut p = Self::new(config);
        p.set_user(Some(user));
        p
    }

    /// Replace the field rule source.
    pub fn with_field_rules<R: FieldRules + 'static>(mut self, rules: R) -> Self {
        self.rules = Box::new(rules);
        self.cache.clear();
        self
    }

    pub fn config(&self) -> &PermissionsConfig {
        &self.config
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    /// Swap the user wholesale. Cached results and audit records belong to
    /// the previous user and are dropped.
    pub fn set_user(&mut self, user: Option<CurrentUser>) {
        match &user {
            Some(u) => info!(user = %u.sub, grants = u.permissions.len(), "permission session user set"),
            None => info!("permission session user cleared"),
        }
        self.user = user;
        self.cache.clear();
        self.audit.clear();
    }

    pub fn logout(&mut self) {
        self.set_user(None);
    }

    /// A user is loaded and the session layer has finished loading it.
    pub fn is_authenticated(&self) -> bool {
        self.user.as_ref().map(|u| !u.is_loading).unwrap_or(false)
    }

    pub fn permission_context(&self) -> Option<SessionContext> {
        if !self.is_authenticated() {
            return None;
        }
        self.user.as_ref().map(|u| SessionContext {
            user_id: u.sub.clone(),
            client_id: u.client_id().map(str::to_string),
        })
    }

    fn authenticated_user(&self) -> Option<&CurrentUser> {
        self.user.as_ref().filter(|u| !u.is_loading)
    }

    fn evaluate(&self, permission: &str, context: Option<&PermissionContext>) -> bool {
        match self.authenticated_user() {
            Some(u) => evaluate_str(u.permissions.as_slice(), permission, &u.sub, context),
            None => false,
        }
    }

    /// Single check. Without an authenticated user the answer is
    /// `context.fallback`, defaulting to `false`.
    pub fn has_permission(&mut self, permission: &str, context: Option<&PermissionContext>) -> bool {
        let user_id = match self.authenticated_user() {
            Some(u) => u.sub.clone(),
            None => {
                let result = context.and_then(|c| c.fallback).unwrap_or(false);
                self.cache.count_check();
                if self.config.audit_enabled {
                    self.audit.record(permission, result, None, false);
                }
                debug!(permission, result, "permission check without authenticated user");
                return result;
            }
        };

        let (result, cached) = if self.config.cache_enabled {
            let key = cache_key(permission, context);
            match self.cache.lookup(&key) {
                Some(hit) => {
                    trace!(permission, result = hit, "permission cache hit");
                    (hit, true)
                }
                None => {
                    let result = self.evaluate(permission, context);
                    self.cache.insert(key, result);
                    (result, false)
                }
            }
        } else {
            self.cache.count_check();
            (self.evaluate(permission, context), false)
        };

        if self.config.audit_enabled {
            self.audit.record(permission, result, Some(&user_id), cached);
        }
        if !result {
            debug!(user = %user_id, permission, "permission denied");
        }
        result
    }

    /// Check `resource:action` for a specific resource instance.
    /// `resource_id` only labels the check in the logs.
    pub fn can_perform_action_on_resource(
        &mut self,
        action: &str,
        resource: &str,
        resource_id: &str,
        owner_id: Option<&str>,
    ) -> bool {
        let context = PermissionContext { owner_id: owner_id.map(str::to_string), ..Default::default() };
        let permission = format!("{}:{}", resource, action);
        let result = self.has_permission(&permission, Some(&context));
        trace!(%permission, resource_id, result, "resource action check");
        result
    }

    /// Evaluate every entry independently; duplicate permissions keep the
    /// last result.
    pub fn check_multiple_permissions(&mut self, checks: &[PermissionCheck]) -> BTreeMap<String, bool> {
        let mut out = BTreeMap::new();
        for c in checks {
            let result = self.has_permission(&c.permission, c.context.as_ref());
            out.insert(c.permission.clone(), result);
        }
        out
    }

    /// True if at least one check passes. Every check is still evaluated and
    /// audited. Empty input is `false`.
    pub fn has_any_permission(&mut self, checks: &[PermissionCheck]) -> bool {
        self.check_multiple_permissions(checks).values().any(|&r| r)
    }

    /// True if every check passes. Empty input is `true`.
    pub fn has_all_permissions(&mut self, checks: &[PermissionCheck]) -> bool {
        self.check_multiple_permissions(checks).values().all(|&r| r)
    }

    fn field_rule(&self, field: &str, resource: &str) -> Result<Option<FieldAccess>, ()> {
        let role = match self.authenticated_user().and_then(|u| u.role.as_deref()) {
            Some(role) => role,
            None => return Ok(None),
        };
        self.rules.lookup(role, resource, field).map_err(|e| {
            warn!(role, resource, field, error = %e, "field rule lookup failed, denying");
        })
    }

    /// Field-level edit decision. A rule for the user's role decides; with no
    /// rule the coarse `resource:update` check decides; a failed lookup denies.
    pub fn can_edit_field(&mut self, field: &str, resource: &str, context: Option<&PermissionContext>) -> bool {
        self.field_access(field, resource, context).is_editable()
    }

    /// Whether a form field should render disabled: anything not editable.
    pub fn is_field_disabled(&mut self, field: &str, resource: &str, context: Option<&PermissionContext>) -> bool {
        !self.can_edit_field(field, resource, context)
    }

    /// Resolved access for one field. Falls back to `resource:update` when no
    /// rule applies; a failed lookup resolves to `Disabled`.
    pub fn field_access(&mut self, field: &str, resource: &str, context: Option<&PermissionContext>) -> FieldAccess {
        match self.field_rule(field, resource) {
            Ok(Some(access)) => access,
            Ok(None) => {
                let permission = create_permission_string(resource, "update", Scope::Any);
                if self.has_permission(&permission, context) {
                    FieldAccess::Editable
                } else {
                    FieldAccess::ReadOnly
                }
            }
            Err(()) => FieldAccess::Disabled,
        }
    }

    /// Drop cached results for `permission` under every context.
    pub fn invalidate_permission(&mut self, permission: &str) -> usize {
        let n = self.cache.invalidate(permission);
        debug!(permission, removed = n, "permission cache invalidated");
        n
    }

    /// Empty the cache and reset hit and check counters.
    pub fn clear_permission_cache(&mut self) {
        self.cache.clear();
        debug!("permission cache cleared");
    }

    /// Evaluate and cache each check ahead of use. Counts toward
    /// `total_checks` but is not audited.
    pub fn prefetch_permissions(&mut self, checks: &[PermissionCheck]) {
        for c in checks {
            self.cache.count_check();
            if !self.config.cache_enabled || !self.is_authenticated() {
                continue;
            }
            let result = self.evaluate(&c.permission, c.context.as_ref());
            self.cache.insert(cache_key(&c.permission, c.context.as_ref()), result);
        }
    }

    pub fn get_performance_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }

    /// Latest `limit` records (all when `None`), most recent last.
    pub fn get_audit_log(&self, limit: Option<usize>) -> Vec<AuditRecord> {
        self.audit.recent(limit)
    }
}
