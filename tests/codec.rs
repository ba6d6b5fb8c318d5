//! Permission string codec: round trips and malformed input

use scopeperm::*;

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn create_always_emits_scope() {
    assert_eq!(create_permission_string("property", "read", Scope::Any), "property:read:any");
    assert_eq!(create_permission_string("lease", "sign", Scope::Assigned), "lease:sign:assigned");
}

#[test]
fn parse_of_create_is_identity() {
    let cases = [
        ("property", "read"),
        ("unit", "update"),
        ("lease", "delete"),
        ("invitation", "send"),
        ("subscription", "manage"),
    ];
    for (r, a) in cases {
        for s in Scope::ALL {
            let p = parse_permission_string(&create_permission_string(r, a, s)).unwrap();
            assert_eq!((p.resource(), p.action(), p.scope()), (r, a, s));
        }
    }
}

#[test]
fn display_matches_create() {
    let p = PermissionString::new("user", "create", Scope::Mine).unwrap();
    assert_eq!(p.to_string(), create_permission_string("user", "create", Scope::Mine));
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn invalid_is_none() {
    assert_eq!(parse_permission_string("invalid"), None);
}

#[test]
fn wrong_segment_counts_are_none() {
    assert_eq!(parse_permission_string(""), None);
    assert_eq!(parse_permission_string("a:b:any:extra"), None);
    assert_eq!(parse_permission_string("a:b:c:d:e"), None);
}

#[test]
fn empty_segments_and_unknown_scopes_are_none() {
    assert_eq!(parse_permission_string("a::any"), None);
    assert_eq!(parse_permission_string(":read"), None);
    assert_eq!(parse_permission_string("property:"), None);
    assert_eq!(parse_permission_string("property:read:everyone"), None);
    assert_eq!(parse_permission_string("property:read:ANY"), None);
}

#[test]
fn constructor_rejects_separator() {
    assert!(PermissionString::new("a:b", "read", Scope::Any).is_none());
    assert!(PermissionString::new("", "read", Scope::Any).is_none());
}

#[test]
fn from_str_errors_carry_input() {
    let e = "a:b:c:d".parse::<PermissionString>().unwrap_err();
    assert!(e.to_string().contains("a:b:c:d"));
}
