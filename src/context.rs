//! Per-check context: resource ownership, assignment, and the unauthenticated fallback

use serde::{Deserialize, Serialize};

/// Ownership facts about the resource being checked.
///
/// Supplied per call and never stored beyond the cache key derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_users: Option<Vec<String>>,
    /// Answer returned when no user is authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

impl PermissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        PermissionContext { owner_id: Some(owner_id.into()), ..Self::default() }
    }

    pub fn assigned_to<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionContext {
            assigned_users: Some(users.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn is_assigned(&self, user_id: &str) -> bool {
        self.assigned_users
            .as_ref()
            .map(|users| users.iter().any(|u| u == user_id))
            .unwrap_or(false)
    }

    /// `permission` followed by the JSON form of this context.
    pub fn cache_key(&self, permission: &str) -> String {
        // Serializing a struct of strings and bools cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{}{}", permission, json)
    }
}

/// Cache key for a check with an optional context; `None` keys as `null`.
pub fn cache_key(permission: &str, context: Option<&PermissionContext>) -> String {
    match context {
        Some(ctx) => ctx.cache_key(permission),
        None => format!("{}null", permission),
    }
}
