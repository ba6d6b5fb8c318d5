//! LMDB-backed user directory
//!
//! Storage patterns:
//! - `users`: `user` → JSON profile (client, role)
//! - `grants`: `user/permission` → epoch the grant was written
//! - `credentials`: `user` → `salt|hash`
//!
//! Permissions are stored in canonical `resource:action:scope` form, so the
//! two-part and three-part spellings of the same grant collapse to one key.

use std::path::Path;

use heed::types::{Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{err, PermError, Result};
use crate::now_millis;
use crate::permission::PermissionString;
use crate::user::{ClientRef, CurrentUser};

type DbEpoch = Database<Str, U64<byteorder::BigEndian>>;

/// Stored per-user attributes other than grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// One user in a seed file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub password: Option<String>,
}

struct Dbs {
    users: Database<Str, Str>,
    grants: DbEpoch,
    credentials: Database<Str, Str>,
}

pub struct UserStore {
    env: Env,
    dbs: Dbs,
}

fn check_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id.contains('/') {
        return Err(PermError::InvalidUserId(user_id.to_string()));
    }
    Ok(())
}

fn canonical(permission: &str) -> Result<String> {
    PermissionString::parse(permission)
        .map(|p| p.to_string())
        .ok_or_else(|| PermError::InvalidPermission(permission.to_string()))
}

#[inline]
fn grant_key(user_id: &str, permission: &str) -> String {
    format!("{}/{}", user_id, permission)
}

impl UserStore {
    /// Open (creating if needed) the directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 28)
                .max_dbs(3)
                .open(path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            users: env.create_database(&mut tx, Some("users")).map_err(err)?,
            grants: env.create_database(&mut tx, Some("grants")).map_err(err)?,
            credentials: env.create_database(&mut tx, Some("credentials")).map_err(err)?,
        };
        tx.commit().map_err(err)?;
        info!(path = %path.display(), "user directory opened");
        Ok(UserStore { env, dbs })
    }

    fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let tx = self.env.read_txn().map_err(err)?;
        f(&self.dbs, &tx)
    }

    fn write<T, F: FnOnce(&Dbs, &mut RwTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut tx = self.env.write_txn().map_err(err)?;
        let r = f(&self.dbs, &mut tx)?;
        tx.commit().map_err(err)?;
        Ok(r)
    }

    // Users

    pub fn put_user(&self, user_id: &str, profile: &UserProfile) -> Result<()> {
        check_user_id(user_id)?;
        let json = serde_json::to_string(profile).map_err(err)?;
        self.write(|d, tx| d.users.put(tx, user_id, &json).map_err(err))
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.read(|d, tx| match d.users.get(tx, user_id).map_err(err)? {
            Some(json) => Ok(Some(serde_json::from_str(json).map_err(err)?)),
            None => Ok(None),
        })
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        self.read(|d, tx| Ok(d.users.get(tx, user_id).map_err(err)?.is_some()))
    }

    /// Remove a user together with their grants and credentials.
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        check_user_id(user_id)?;
        let prefix = grant_key(user_id, "");
        self.write(|d, tx| {
            let keys: Vec<String> = d
                .grants
                .prefix_iter(tx, &prefix)
                .map_err(err)?
                .map(|item| item.map(|(k, _)| k.to_string()).map_err(err))
                .collect::<Result<_>>()?;
            for k in keys {
                d.grants.delete(tx, &k).map_err(err)?;
            }
            d.credentials.delete(tx, user_id).map_err(err)?;
            d.users.delete(tx, user_id).map_err(err)
        })
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.users.iter(tx).map_err(err)? {
                let (k, _) = item.map_err(err)?;
                r.push(k.to_string());
            }
            Ok(r)
        })
    }

    // Grants

    /// Grant `permission` to an existing user. Re-granting refreshes the epoch.
    pub fn grant(&self, user_id: &str, permission: &str) -> Result<()> {
        self.grant_all(user_id, &[permission])
    }

    /// Grant several permissions in one transaction; nothing is written if
    /// any of them is malformed.
    pub fn grant_all<S: AsRef<str>>(&self, user_id: &str, permissions: &[S]) -> Result<()> {
        check_user_id(user_id)?;
        let canon = permissions
            .iter()
            .map(|p| canonical(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let epoch = now_millis();
        self.write(|d, tx| {
            if d.users.get(tx, user_id).map_err(err)?.is_none() {
                return Err(PermError::NotFound(format!("user {}", user_id)));
            }
            for p in &canon {
                d.grants.put(tx, &grant_key(user_id, p), &epoch).map_err(err)?;
            }
            Ok(())
        })
    }

    pub fn revoke(&self, user_id: &str, permission: &str) -> Result<bool> {
        check_user_id(user_id)?;
        let p = canonical(permission)?;
        self.write(|d, tx| d.grants.delete(tx, &grant_key(user_id, &p)).map_err(err))
    }

    /// `(permission, epoch)` pairs for a user, in key order.
    pub fn list_grants(&self, user_id: &str) -> Result<Vec<(String, u64)>> {
        check_user_id(user_id)?;
        let prefix = grant_key(user_id, "");
        self.read(|d, tx| {
            let mut r = Vec::new();
            for item in d.grants.prefix_iter(tx, &prefix).map_err(err)? {
                let (k, epoch) = item.map_err(err)?;
                if let Some(p) = k.strip_prefix(&prefix) {
                    r.push((p.to_string(), epoch));
                }
            }
            Ok(r)
        })
    }

    pub fn list_permissions(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.list_grants(user_id)?.into_iter().map(|(p, _)| p).collect())
    }

    /// Assemble the session snapshot for `user_id`, or `None` if unknown.
    pub fn load_user(&self, user_id: &str) -> Result<Option<CurrentUser>> {
        let profile = match self.get_profile(user_id)? {
            Some(p) => p,
            None => return Ok(None),
        };
        Ok(Some(CurrentUser {
            sub: user_id.to_string(),
            client: profile.client_id.map(|cuid| ClientRef { cuid }),
            permissions: self.list_permissions(user_id)?,
            role: profile.role,
            is_loading: false,
        }))
    }

    // Credentials

    pub(crate) fn put_credentials(&self, user_id: &str, value: &str) -> Result<()> {
        check_user_id(user_id)?;
        self.write(|d, tx| {
            if d.users.get(tx, user_id).map_err(err)?.is_none() {
                return Err(PermError::NotFound(format!("user {}", user_id)));
            }
            d.credentials.put(tx, user_id, value).map_err(err)
        })
    }

    pub(crate) fn get_credentials(&self, user_id: &str) -> Result<Option<String>> {
        self.read(|d, tx| Ok(d.credentials.get(tx, user_id).map_err(err)?.map(str::to_string)))
    }

    /// Load users from a seed list: profile, grants and optional password.
    pub fn seed(&self, users: &[SeedUser]) -> Result<usize> {
        for u in users {
            self.put_user(
                &u.id,
                &UserProfile { client_id: u.client_id.clone(), role: u.role.clone() },
            )?;
            self.grant_all(&u.id, &u.permissions)?;
            if let Some(pw) = &u.password {
                crate::auth::set_password(self, &u.id, pw)?;
            }
        }
        info!(users = users.len(), "user directory seeded");
        Ok(users.len())
    }

    /// Parse a JSON array of [`SeedUser`] and load it.
    pub fn seed_json(&self, json: &str) -> Result<usize> {
        let users: Vec<SeedUser> = serde_json::from_str(json)
            .map_err(|e| PermError::Config(format!("seed file: {}", e)))?;
        self.seed(&users)
    }

    /// Drop every user, grant and credential.
    pub fn clear(&self) -> Result<()> {
        self.write(|d, tx| {
            d.users.clear(tx).map_err(err)?;
            d.grants.clear(tx).map_err(err)?;
            d.credentials.clear(tx).map_err(err)
        })
    }
}
