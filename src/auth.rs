//! Credentials and session tokens
//!
//! A session is one [`Permissions`] value keyed by the SHA-256 of its bearer
//! token. Tokens themselves are never kept. Each session owns its own cache
//! and audit log, so logging one user out leaves the others untouched.

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::config::PermissionsConfig;
use crate::error::{PermError, Result};
use crate::now_millis;
use crate::permissions::Permissions;
use crate::store::UserStore;
use crate::user::CurrentUser;

/// Generate a cryptographically secure token (32 bytes, base64url encoded)
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| PermError::Store(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash token with SHA-256 for lookup
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| PermError::Store(e.to_string()))?;
    Ok(hex::encode(bytes))
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Store a salted password hash for an existing user.
pub fn set_password(store: &UserStore, user_id: &str, password: &str) -> Result<()> {
    let salt = generate_salt()?;
    let value = format!("{}|{}", salt, hash_password(&salt, password));
    store.put_credentials(user_id, &value)
}

/// `false` for a wrong password or a user without credentials.
pub fn verify_password(store: &UserStore, user_id: &str, password: &str) -> Result<bool> {
    let value = match store.get_credentials(user_id)? {
        Some(v) => v,
        None => return Ok(false),
    };
    match value.split_once('|') {
        Some((salt, stored)) => {
            let computed = hash_password(salt, password);
            Ok(bool::from(stored.as_bytes().ct_eq(computed.as_bytes())))
        }
        None => Err(PermError::Store(format!("corrupted credentials for {}", user_id))),
    }
}

/// Session info returned by [`SessionRegistry::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: String,
    pub created_at: u64,
    pub expires_at: u64, // 0 = never
}

struct Session {
    permissions: Permissions,
    created_at: u64,
    expires_at: u64,
}

impl Session {
    fn expired(&self, now: u64) -> bool {
        self.expires_at > 0 && self.expires_at < now
    }
}

/// Expiry epoch in millis, pinned at `u64::MAX` for huge TTLs.
fn expiry(now: u64, ttl_secs: u64) -> u64 {
    now.saturating_add(ttl_secs.saturating_mul(1000))
}

/// Check the password and load the user's grants without opening a session.
pub fn authenticate(store: &UserStore, user_id: &str, password: &str) -> Result<CurrentUser> {
    if !verify_password(store, user_id, password)? {
        debug!(user = user_id, "login rejected");
        return Err(PermError::InvalidCredentials);
    }
    store
        .load_user(user_id)?
        .ok_or_else(|| PermError::NotFound(format!("user {}", user_id)))
}

/// Live sessions keyed by token hash.
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    ttl_secs: Option<u64>,
}

impl SessionRegistry {
    /// `ttl_secs` of `None` keeps sessions until logout.
    pub fn new(ttl_secs: Option<u64>) -> Self {
        SessionRegistry { sessions: HashMap::new(), ttl_secs }
    }

    /// Start a session for an already-resolved user; returns the bearer token.
    pub fn open(&mut self, user: CurrentUser, config: PermissionsConfig) -> Result<String> {
        let token = generate_token()?;
        let now = now_millis();
        let user_id = user.sub.clone();
        self.sessions.insert(
            hash_token(&token),
            Session {
                permissions: Permissions::with_user(user, config),
                created_at: now,
                expires_at: self.ttl_secs.map(|t| expiry(now, t)).unwrap_or(0),
            },
        );
        info!(user = %user_id, "session opened");
        Ok(token)
    }

    /// Verify the password, load the user's grants and open a session.
    pub fn login(
        &mut self,
        store: &UserStore,
        user_id: &str,
        password: &str,
        config: PermissionsConfig,
    ) -> Result<String> {
        let user = authenticate(store, user_id, password)?;
        self.open(user, config)
    }

    /// The session's facade. Expired sessions are dropped on access.
    pub fn get_mut(&mut self, token: &str) -> Result<&mut Permissions> {
        let hash = hash_token(token);
        let expired = match self.sessions.get(&hash) {
            Some(s) => s.expired(now_millis()),
            None => return Err(PermError::InvalidToken),
        };
        if expired {
            self.sessions.remove(&hash);
            return Err(PermError::InvalidToken);
        }
        self.sessions
            .get_mut(&hash)
            .map(|s| &mut s.permissions)
            .ok_or(PermError::InvalidToken)
    }

    /// End a session. Returns whether the token was live.
    pub fn logout(&mut self, token: &str) -> bool {
        match self.sessions.remove(&hash_token(token)) {
            Some(mut s) => {
                s.permissions.logout();
                true
            }
            None => false,
        }
    }

    /// Drop every session for `user_id`, e.g. after their grants change.
    pub fn logout_user(&mut self, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.permissions.user().map(|u| u.sub != user_id).unwrap_or(true));
        before - self.sessions.len()
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = now_millis();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.expired(now));
        before - self.sessions.len()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .values()
            .filter_map(|s| {
                s.permissions.user().map(|u| SessionInfo {
                    user_id: u.sub.clone(),
                    created_at: s.created_at,
                    expires_at: s.expires_at,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
