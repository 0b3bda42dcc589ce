//! Local user store: argon2 password hashes with optional JSON file persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

pub struct UserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    path: Option<PathBuf>,
}

impl UserStore {
    pub fn in_memory() -> Self {
        Self { users: RwLock::new(HashMap::new()), path: None }
    }

    /// Open a file-backed store; a missing file starts empty and is created on first save.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let users = if path.exists() {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading users file {}", path.display()))?;
            let list: Vec<UserRecord> = serde_json::from_str(&raw).with_context(|| format!("parsing users file {}", path.display()))?;
            list.into_iter().map(|u| (u.username.to_ascii_lowercase(), u)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self { users: RwLock::new(users), path: Some(path) })
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()); };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let mut list: Vec<UserRecord> = self.users.read().values().cloned().collect();
        list.sort_by(|a, b| a.username.cmp(&b.username));
        let raw = serde_json::to_string_pretty(&list)?;
        std::fs::write(path, raw).with_context(|| format!("writing users file {}", path.display()))?;
        Ok(())
    }

    pub fn upsert_user(&self, username: &str, password: &str, is_admin: bool, display_name: Option<String>) -> Result<()> {
        if username.trim().is_empty() { return Err(anyhow!("username must not be empty")); }
        let rec = UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            is_admin,
            roles: Vec::new(),
            display_name,
        };
        self.users.write().insert(username.to_ascii_lowercase(), rec);
        self.save()
    }

    pub fn grant_role(&self, username: &str, role: &str) -> Result<()> {
        {
            let mut users = self.users.write();
            let rec = users
                .get_mut(&username.to_ascii_lowercase())
                .ok_or_else(|| anyhow!("unknown user '{}'", username))?;
            if !rec.roles.iter().any(|r| r.eq_ignore_ascii_case(role)) { rec.roles.push(role.to_string()); }
        }
        self.save()
    }

    /// Usernames are matched case-insensitively.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<UserRecord> {
        let rec = self.users.read().get(&username.to_ascii_lowercase()).cloned()?;
        verify_password(&rec.password_hash, password).then_some(rec)
    }

    pub fn len(&self) -> usize { self.users.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Seed an admin account when the store has no users. Returns true if one was created.
    pub fn ensure_default_admin(&self, username: &str, password: &str) -> Result<bool> {
        if !self.is_empty() { return Ok(false); }
        self.upsert_user(username, password, true, Some("Administrator".into()))?;
        info!(target: "session_locals::security", user = %username, "created default admin account");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip_and_rejects_garbage() {
        let h = hash_password("s3cret").unwrap();
        assert!(h.starts_with("$argon2"));
        assert!(verify_password(&h, "s3cret"));
        assert!(!verify_password(&h, "S3cret"));
        assert!(!verify_password("not-a-phc", "s3cret"));
    }

    #[test]
    fn authenticate_is_case_insensitive_on_username() {
        let s = UserStore::in_memory();
        s.upsert_user("Alice", "pw", false, None).unwrap();
        assert_eq!(s.authenticate("alice", "pw").map(|u| u.username), Some("Alice".to_string()));
        assert!(s.authenticate("alice", "wrong").is_none());
        assert!(s.authenticate("nobody", "pw").is_none());
    }

    #[test]
    fn default_admin_only_seeds_empty_store() {
        let s = UserStore::in_memory();
        assert!(s.ensure_default_admin("admin", "admin").unwrap());
        assert!(!s.ensure_default_admin("admin2", "x").unwrap());
        assert!(s.authenticate("admin", "admin").unwrap().is_admin);
    }

    #[test]
    fn file_store_persists_users_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("users.json");
        {
            let s = UserStore::load(&path).unwrap();
            s.upsert_user("bob", "pw", false, None).unwrap();
            s.grant_role("bob", "editor").unwrap();
        }
        let s = UserStore::load(&path).unwrap();
        let bob = s.authenticate("bob", "pw").unwrap();
        assert_eq!(bob.roles, vec!["editor".to_string()]);
        assert!(s.grant_role("carol", "editor").is_err());
    }
}
