//! Scope evaluation against a granted permission set

use crate::context::PermissionContext;
use crate::permission::{PermissionString, Scope};

/// Does a single grant hold for `user_id` under `ctx`?
#[inline]
pub fn grant_satisfied(grant: Scope, user_id: &str, ctx: Option<&PermissionContext>) -> bool {
    match grant {
        Scope::Any => true,
        Scope::Mine => ctx.map(|c| c.is_owned_by(user_id)).unwrap_or(false),
        Scope::Assigned => ctx.map(|c| c.is_assigned(user_id)).unwrap_or(false),
    }
}

/// Can a grant of scope `grant` answer a request made at scope `requested`?
///
/// The requested scope is a ceiling: `any` takes every grant, `mine` and
/// `assigned` take `any` grants or grants of their own kind.
#[inline]
fn admissible(requested: Scope, grant: Scope) -> bool {
    requested == Scope::Any || grant == Scope::Any || grant == requested
}

/// Evaluate `requested` against `granted` for `user_id`.
///
/// Every grant with the same resource and action is tried; one satisfied
/// grant is enough. Malformed grants are skipped.
pub fn evaluate<S: AsRef<str>>(
    granted: &[S],
    requested: &PermissionString,
    user_id: &str,
    ctx: Option<&PermissionContext>,
) -> bool {
    granted
        .iter()
        .filter_map(|g| PermissionString::parse(g.as_ref()))
        .filter(|g| g.same_target(requested))
        .filter(|g| admissible(requested.scope(), g.scope()))
        .any(|g| grant_satisfied(g.scope(), user_id, ctx))
}

/// Evaluate a raw permission string; malformed input is a deny.
pub fn evaluate_str<S: AsRef<str>>(
    granted: &[S],
    requested: &str,
    user_id: &str,
    ctx: Option<&PermissionContext>,
) -> bool {
    match PermissionString::parse(requested) {
        Some(p) => evaluate(granted, &p, user_id, ctx),
        None => false,
    }
}
