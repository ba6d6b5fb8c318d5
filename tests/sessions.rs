//! Password login and the session registry

use scopeperm::*;
use tempfile::TempDir;

fn setup() -> (TempDir, UserStore) {
    let dir = TempDir::new().unwrap();
    let store = UserStore::open(dir.path()).unwrap();
    store
        .put_user("alice", &UserProfile { client_id: Some("c1".into()), role: Some("staff".into()) })
        .unwrap();
    store.grant_all("alice", &["property:read", "property:update:mine"]).unwrap();
    set_password(&store, "alice", "correct horse").unwrap();
    store.put_user("bob", &UserProfile::default()).unwrap();
    store.grant("bob", "unit:read").unwrap();
    set_password(&store, "bob", "hunter2").unwrap();
    (dir, store)
}

// ============================================================================
// Passwords
// ============================================================================

#[test]
fn password_verification() {
    let (_dir, store) = setup();
    assert!(verify_password(&store, "alice", "correct horse").unwrap());
    assert!(!verify_password(&store, "alice", "wrong").unwrap());
    assert!(!verify_password(&store, "nobody", "x").unwrap());
}

#[test]
fn password_for_unknown_user_fails() {
    let (_dir, store) = setup();
    assert!(matches!(set_password(&store, "ghost", "x"), Err(PermError::NotFound(_))));
}

#[test]
fn salts_differ() {
    let (_dir, store) = setup();
    set_password(&store, "bob", "same").unwrap();
    set_password(&store, "alice", "same").unwrap();
    assert!(verify_password(&store, "bob", "same").unwrap());
    assert!(verify_password(&store, "alice", "same").unwrap());
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn login_and_check() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(None);
    let token = reg.login(&store, "alice", "correct horse", PermissionsConfig::default()).unwrap();
    let p = reg.get_mut(&token).unwrap();
    assert!(p.is_authenticated());
    assert!(p.has_permission("property:read", None));
    assert!(p.has_permission("property:update", Some(&PermissionContext::owned_by("alice"))));
    assert!(!p.has_permission("property:delete", None));
    assert_eq!(p.permission_context().unwrap().client_id.as_deref(), Some("c1"));
}

#[test]
fn wrong_password_rejected() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(None);
    let r = reg.login(&store, "alice", "nope", PermissionsConfig::default());
    assert_eq!(r, Err(PermError::InvalidCredentials));
    assert!(reg.is_empty());
}

#[test]
fn unknown_token_rejected() {
    let mut reg = SessionRegistry::new(None);
    assert!(matches!(reg.get_mut("not-a-token"), Err(PermError::InvalidToken)));
}

#[test]
fn logout_invalidates_token() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(None);
    let token = reg.login(&store, "bob", "hunter2", PermissionsConfig::default()).unwrap();
    assert!(reg.logout(&token));
    assert!(!reg.logout(&token));
    assert!(matches!(reg.get_mut(&token), Err(PermError::InvalidToken)));
}

#[test]
fn sessions_do_not_share_state() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(None);
    let a = reg.login(&store, "alice", "correct horse", PermissionsConfig::default()).unwrap();
    let b = reg.login(&store, "bob", "hunter2", PermissionsConfig::default()).unwrap();
    assert_ne!(a, b);

    reg.get_mut(&a).unwrap().has_permission("property:read", None);
    reg.get_mut(&a).unwrap().has_permission("property:read", None);
    let bob = reg.get_mut(&b).unwrap();
    assert!(bob.get_audit_log(None).is_empty());
    assert_eq!(bob.get_performance_metrics().total_checks, 0);
    assert!(!bob.has_permission("property:read", None));
    assert!(bob.has_permission("unit:read", None));
}

#[test]
fn zero_ttl_expires_immediately() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(Some(0));
    let token = reg.login(&store, "bob", "hunter2", PermissionsConfig::default()).unwrap();
    // ttl 0 means expires_at == created_at, which only fails once time moves on
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(matches!(reg.get_mut(&token), Err(PermError::InvalidToken)));
    assert!(reg.is_empty());
}

#[test]
fn huge_ttl_saturates_instead_of_overflowing() {
    let mut reg = SessionRegistry::new(Some(u64::MAX / 100));
    let token = reg.open(CurrentUser::new("svc"), PermissionsConfig::default()).unwrap();
    assert!(reg.get_mut(&token).is_ok());
    assert_eq!(reg.list()[0].expires_at, u64::MAX);
    assert_eq!(reg.purge_expired(), 0);
}

#[test]
fn authenticate_without_session() {
    let (_dir, store) = setup();
    let user = authenticate(&store, "alice", "correct horse").unwrap();
    assert_eq!(user.sub, "alice");
    assert_eq!(user.role.as_deref(), Some("staff"));
    assert!(matches!(authenticate(&store, "alice", "nope"), Err(PermError::InvalidCredentials)));
    assert!(matches!(authenticate(&store, "nobody", "x"), Err(PermError::InvalidCredentials)));
}

#[test]
fn purge_and_list() {
    let (_dir, store) = setup();
    let mut reg = SessionRegistry::new(Some(3600));
    reg.login(&store, "alice", "correct horse", PermissionsConfig::default()).unwrap();
    reg.login(&store, "bob", "hunter2", PermissionsConfig::default()).unwrap();
    assert_eq!(reg.purge_expired(), 0);
    let mut users: Vec<String> = reg.list().into_iter().map(|s| s.user_id).collect();
    users.sort();
    assert_eq!(users, vec!["alice", "bob"]);
    assert!(reg.list().iter().all(|s| s.expires_at > s.created_at));
    assert_eq!(reg.logout_user("alice"), 1);
    assert_eq!(reg.len(), 1);
}

#[test]
fn open_without_password() {
    let mut reg = SessionRegistry::new(None);
    let token = reg
        .open(CurrentUser::new("svc").with_permissions(["notification:send"]), PermissionsConfig::default())
        .unwrap();
    assert!(reg.get_mut(&token).unwrap().has_permission("notification:send", None));
}
