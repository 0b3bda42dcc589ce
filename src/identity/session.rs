use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tprintln;

use super::principal::Principal;

pub type SessionToken = String;

/// An authenticated session as produced by an identity provider.
///
/// Treated as opaque and immutable once handed to request handling; the only field
/// the resolver itself looks at is `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub token: SessionToken,
    pub principal: Principal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }
}

#[derive(Default)]
struct SessionTable {
    by_token: HashMap<SessionToken, Session>,
    user_index: HashMap<String, HashSet<SessionToken>>,
}

impl SessionTable {
    fn remove(&mut self, token: &str) -> Option<Session> {
        let sess = self.by_token.remove(token)?;
        if let Some(set) = self.user_index.get_mut(&sess.principal.user_id) {
            set.remove(token);
            if set.is_empty() { self.user_index.remove(&sess.principal.user_id); }
        }
        Some(sess)
    }
}

fn gen_id() -> anyhow::Result<String> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("rng unavailable: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Issues and tracks opaque session tokens for the local identity provider.
///
/// This is the provider's own credential table. Resolved sessions are never cached
/// here on behalf of requests; each request resolves through its own locals.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    table: Arc<RwLock<SessionTable>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::with_ttl(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, table: Arc::new(RwLock::new(SessionTable::default())) }
    }

    pub fn issue(&self, principal: Principal) -> anyhow::Result<Session> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| anyhow::anyhow!("session ttl of {}s is out of range", self.ttl.as_secs()))?;
        let sess = Session {
            session_id: gen_id()?,
            token: gen_id()?,
            principal,
            issued_at: now,
            expires_at,
        };
        // abandoned tokens would otherwise stay until looked up again
        self.prune_expired();
        self.insert(sess.clone());
        tprintln!("session.issue user={} sid={} ttl_secs={}", sess.principal.user_id, sess.session_id, self.ttl.as_secs());
        Ok(sess)
    }

    /// Register a session produced elsewhere (imports, fixtures).
    pub fn insert(&self, sess: Session) {
        let mut t = self.table.write();
        t.user_index
            .entry(sess.principal.user_id.clone())
            .or_default()
            .insert(sess.token.clone());
        t.by_token.insert(sess.token.clone(), sess);
    }

    /// Raw lookup; expired sessions are returned so the caller can tell "expired" from "unknown".
    pub fn lookup(&self, token: &str) -> Option<Session> {
        self.table.read().by_token.get(token).cloned()
    }

    /// Lookup that only yields live sessions and prunes the entry once it has expired.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let sess = self.lookup(token)?;
        if sess.is_expired() {
            self.remove(token);
            return None;
        }
        Some(sess)
    }

    pub fn logout(&self, token: &str) -> bool {
        let removed = self.remove(token);
        if removed { tprintln!("session.logout"); }
        removed
    }

    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut t = self.table.write();
        let tokens = t.user_index.remove(user_id).unwrap_or_default();
        let count = tokens.iter().filter(|tok| t.by_token.remove(*tok).is_some()).count();
        tprintln!("session.revoke user={} count={}", user_id, count);
        count
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut t = self.table.write();
        let expired: Vec<SessionToken> = t
            .by_token
            .iter()
            .filter(|(_, sess)| sess.is_expired_at(now))
            .map(|(tok, _)| tok.clone())
            .collect();
        for tok in &expired {
            t.remove(tok);
        }
        expired.len()
    }

    pub fn len(&self) -> usize { self.table.read().by_token.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn remove(&self, token: &str) -> bool {
        self.table.write().remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_validate() {
        let sm = SessionManager::default();
        let s = sm.issue(Principal::new("alice")).unwrap();
        assert_ne!(s.token, s.session_id);
        let got = sm.validate(&s.token).expect("live session");
        assert_eq!(got.principal.user_id, "alice");
        assert!(got.expires_at > got.issued_at);
    }

    #[test]
    fn expired_sessions_are_visible_to_lookup_but_not_validate() {
        let sm = SessionManager::with_ttl(Duration::from_secs(0));
        let s = sm.issue(Principal::new("bob")).unwrap();
        assert!(sm.lookup(&s.token).is_some());
        assert!(sm.validate(&s.token).is_none());
        // validate prunes
        assert!(sm.lookup(&s.token).is_none());
    }

    #[test]
    fn logout_and_revoke_user() {
        let sm = SessionManager::default();
        let a1 = sm.issue(Principal::new("carol")).unwrap();
        let _a2 = sm.issue(Principal::new("carol")).unwrap();
        let b = sm.issue(Principal::new("dave")).unwrap();
        assert!(sm.logout(&a1.token));
        assert!(!sm.logout(&a1.token));
        assert_eq!(sm.revoke_user("carol"), 1);
        assert_eq!(sm.len(), 1);
        assert!(sm.validate(&b.token).is_some());
    }

    #[test]
    fn issuing_sweeps_abandoned_expired_sessions() {
        let sm = SessionManager::with_ttl(Duration::from_millis(1));
        for i in 0..200 {
            sm.issue(Principal::new(format!("user{}", i % 7))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(10));
        let fresh = sm.issue(Principal::new("late")).unwrap();
        assert_eq!(sm.len(), 1);
        assert!(sm.lookup(&fresh.token).is_some());
        assert_eq!(sm.revoke_user("user0"), 0);
    }

    #[test]
    fn prune_expired_keeps_live_sessions() {
        let short = SessionManager::with_ttl(Duration::from_secs(0));
        short.issue(Principal::new("a")).unwrap();
        let long = SessionManager { ttl: Duration::from_secs(600), table: short.table.clone() };
        let live = long.issue(Principal::new("b")).unwrap();
        assert_eq!(long.len(), 1);
        short.issue(Principal::new("c")).unwrap();
        assert_eq!(long.prune_expired(), 1);
        assert!(long.lookup(&live.token).is_some());
    }

    #[test]
    fn out_of_range_ttl_is_an_error_not_a_panic() {
        let sm = SessionManager::with_ttl(Duration::from_secs(1_000_000_000_000_000));
        assert!(sm.issue(Principal::new("u")).is_err());
        assert!(sm.is_empty());
        let huge = SessionManager::with_ttl(Duration::from_secs(u64::MAX));
        assert!(huge.issue(Principal::new("u")).is_err());
    }

    #[test]
    fn token_is_not_serialized() {
        let sm = SessionManager::default();
        let s = sm.issue(Principal::new("erin")).unwrap();
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("token").is_none());
        assert_eq!(v["principal"]["user_id"], "erin");
    }
}
