use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::security::UserStore;
use crate::tprintln;

use super::credential::Credential;
use super::principal::{Attrs, Principal};
use super::session::{Session, SessionManager};

/// Why an identity provider could not produce a session.
///
/// Only `Unavailable` means "cannot determine"; the other variants mean "not authenticated".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("credential is malformed or unknown")]
    InvalidCredential,
    #[error("credential has expired")]
    Expired,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Process-wide collaborator that validates credentials and produces sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn lookup(&self, credential: &Credential) -> Result<Session, ProviderError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// In-process provider: argon2 user store for login, `SessionManager` for tokens.
pub struct LocalIdentityProvider {
    pub users: Arc<UserStore>,
    pub sm: SessionManager,
}

impl LocalIdentityProvider {
    pub fn new(users: Arc<UserStore>, sm: SessionManager) -> Self { Self { users, sm } }

    pub fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let Some(user) = self.users.authenticate(&req.username, &req.password) else {
            debug!(target: "session_locals::provider", user = %req.username, "login rejected");
            return Err(AppError::auth("invalid_credentials", "invalid username or password"));
        };
        let mut principal = Principal::new(user.username.clone());
        for role in &user.roles {
            principal = principal.with_role(role.clone());
        }
        if user.is_admin { principal = principal.with_role("admin"); }
        principal.attrs = Attrs { display_name: user.display_name.clone(), ip: req.ip.clone(), ..Default::default() };

        let session = self.sm.issue(principal).map_err(|e| AppError::internal("session_issue_failed".to_string(), e.to_string()))?;
        tprintln!("auth.login user={} sid={}", req.username, session.session_id);
        Ok(LoginResponse { session })
    }

    pub fn logout(&self, token: &str) -> bool { self.sm.logout(token) }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn lookup(&self, credential: &Credential) -> Result<Session, ProviderError> {
        let Some(sess) = self.sm.lookup(credential.token()) else {
            return Err(ProviderError::InvalidCredential);
        };
        if sess.is_expired() {
            self.sm.logout(credential.token());
            return Err(ProviderError::Expired);
        }
        Ok(sess)
    }

    fn name(&self) -> &'static str { "local" }
}

/// Remote provider speaking a minimal token-introspection protocol:
/// `GET {base}/introspect` with `Authorization: Bearer <token>` answering a JSON `Session`.
pub struct HttpIdentityProvider {
    introspect_url: Url,
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base).map_err(|e| anyhow::anyhow!("invalid identity provider URL '{}': {}", base, e))?;
        if !base_url.path().ends_with('/') {
            let p = format!("{}/", base_url.path());
            base_url.set_path(&p);
        }
        let introspect_url = base_url.join("introspect")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { introspect_url, client })
    }

    pub fn introspect_url(&self) -> &Url { &self.introspect_url }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn lookup(&self, credential: &Credential) -> Result<Session, ProviderError> {
        let resp = self.client
            .get(self.introspect_url.clone())
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "session_locals::provider", url = %self.introspect_url, "introspection request failed: {}", e);
                ProviderError::Unavailable(e.to_string())
            })?;
        match resp.status() {
            StatusCode::OK => {
                let mut sess: Session = resp
                    .json()
                    .await
                    .map_err(|e| ProviderError::Unavailable(format!("undecodable introspection response: {}", e)))?;
                sess.token = credential.token().to_string();
                Ok(sess)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                Err(ProviderError::InvalidCredential)
            }
            StatusCode::GONE => Err(ProviderError::Expired),
            other => Err(ProviderError::Unavailable(format!("introspection returned HTTP {}", other))),
        }
    }

    fn name(&self) -> &'static str { "http" }
}
