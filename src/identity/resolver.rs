//! Lazy, single-flight session resolution bound to one request.
//!
//! The provider lookup is wrapped in a [`Shared`] future at construction time. Nothing
//! runs until the first `resolve()` polls it; every later or concurrent caller awaits
//! a clone of the same future, so the provider sees at most one lookup per request and
//! all callers observe the identical outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, warn, Instrument};

use super::credential::Credential;
use super::provider::{IdentityProvider, ProviderError};
use super::session::Session;

/// Outcome of resolving the current request's session. `Ok(None)` means "not authenticated".
pub type Resolution = Result<Option<Arc<Session>>, ResolveError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The provider could not be reached, so authentication state is unknown.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// `get_session` was used after its request context was torn down.
    #[error("session resolved after its request context was torn down")]
    ContextClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Unresolved,
    Resolving,
    Resolved,
}

struct Inner {
    lookup: Shared<BoxFuture<'static, Resolution>>,
    started: AtomicBool,
    closed: AtomicBool,
    request_id: String,
}

/// The `get_session` accessor: cheap to clone, all clones share one memoized lookup.
#[derive(Clone)]
pub struct SessionResolver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("request_id", &self.inner.request_id)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn lookup_session(provider: Arc<dyn IdentityProvider>, credential: Option<Credential>) -> Resolution {
    let Some(credential) = credential else {
        debug!(target: "session_locals::resolver", "no credential on request");
        return Ok(None);
    };
    match provider.lookup(&credential).await {
        Ok(sess) if sess.is_expired() => {
            debug!(target: "session_locals::resolver", sid = %sess.session_id, "provider returned an expired session");
            Ok(None)
        }
        Ok(sess) => {
            debug!(target: "session_locals::resolver", user = %sess.principal.user_id, sid = %sess.session_id, "session resolved");
            Ok(Some(Arc::new(sess)))
        }
        Err(ProviderError::InvalidCredential) | Err(ProviderError::Expired) => Ok(None),
        Err(ProviderError::Unavailable(msg)) => {
            warn!(target: "session_locals::resolver", provider = provider.name(), "cannot determine session: {}", msg);
            Err(ResolveError::ProviderUnavailable(msg))
        }
    }
}

impl SessionResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>, credential: Option<Credential>, request_id: &str) -> Self {
        let span = tracing::debug_span!("resolve_session", request_id = %request_id);
        let lookup = lookup_session(provider, credential).instrument(span).boxed().shared();
        Self {
            inner: Arc::new(Inner {
                lookup,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                request_id: request_id.to_string(),
            }),
        }
    }

    /// Resolve the session for this request, starting the lookup on first use.
    pub async fn resolve(&self) -> Resolution {
        if self.is_closed() {
            error!(
                target: "session_locals::resolver",
                request_id = %self.inner.request_id,
                "get_session called after the request context was torn down"
            );
            return Err(ResolveError::ContextClosed);
        }
        self.inner.started.store(true, Ordering::Release);
        self.inner.lookup.clone().await
    }

    pub fn state(&self) -> ResolverState {
        if self.inner.lookup.peek().is_some() {
            ResolverState::Resolved
        } else if self.inner.started.load(Ordering::Acquire) {
            ResolverState::Resolving
        } else {
            ResolverState::Unresolved
        }
    }

    /// The settled outcome, if any, without starting or driving the lookup.
    pub fn peek(&self) -> Option<Resolution> {
        self.inner.lookup.peek().cloned()
    }

    pub fn request_id(&self) -> &str { &self.inner.request_id }

    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}
