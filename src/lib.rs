//! scopeperm - scoped permission checks for multi-tenant property management
//!
//! Grants are strings of the form `resource:action:scope` where scope is one of
//! `any`, `mine` or `assigned`. A [`Permissions`] value evaluates checks for a
//! single logged-in user, memoizes the results, keeps an audit trail and
//! answers field-level edit questions.
//!
//! ```
//! use scopeperm::{CurrentUser, Permissions, PermissionsConfig, PermissionContext};
//!
//! let user = CurrentUser::new("user123")
//!     .with_permissions(["property:create:any", "property:update:mine"]);
//! let mut perms = Permissions::with_user(user, PermissionsConfig::default());
//!
//! assert!(perms.has_permission("property:create", None));
//! assert!(perms.has_permission("property:update", Some(&PermissionContext::owned_by("user123"))));
//! assert!(!perms.has_permission("property:update", Some(&PermissionContext::owned_by("other"))));
//! ```
//!
//! Users, grants and credentials can be persisted in an LMDB directory
//! ([`UserStore`]) and served over HTTP with the `server` feature.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fields;
pub mod permission;
pub mod permissions;
pub mod scope;
pub mod store;
pub mod user;

pub use audit::{AuditLog, AuditRecord};
pub use auth::{authenticate, generate_token, hash_token, set_password, verify_password, SessionInfo, SessionRegistry};
pub use cache::{CacheEntry, CacheMetrics, PermissionCache};
pub use config::PermissionsConfig;
pub use context::PermissionContext;
pub use error::{PermError, Result};
pub use fields::{FieldAccess, FieldRuleError, FieldRuleTable, FieldRules, ANY_FIELD};
pub use permission::{
    create_permission_string, parse_permission_string, ParsePermissionError, PermissionString, Scope,
};
pub use permissions::{PermissionCheck, Permissions};
pub use scope::{evaluate, evaluate_str};
pub use store::{SeedUser, UserProfile, UserStore};
pub use user::{ClientRef, CurrentUser, SessionContext};

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
