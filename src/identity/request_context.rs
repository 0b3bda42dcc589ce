use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

use super::credential::Credential;
use super::provider::IdentityProvider;
use super::resolver::{Resolution, SessionResolver};

/// Per-request bag installed into request extensions before handlers run.
#[derive(Debug, Clone)]
pub struct Locals {
    pub get_session: SessionResolver,
}

impl Locals {
    /// Shorthand for `locals.get_session.resolve()`.
    pub async fn session(&self) -> Resolution {
        self.get_session.resolve().await
    }
}

/// Request-scoped state, created when handling starts and torn down when it ends.
///
/// Dropping the context (normal completion, error, or the request future being
/// cancelled on client disconnect) closes its locals; any handle that escaped the
/// request then fails with `ResolveError::ContextClosed`.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    locals: Locals,
}

impl RequestContext {
    pub fn new(provider: Arc<dyn IdentityProvider>, credential: Option<Credential>) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        let get_session = SessionResolver::new(provider, credential, &request_id);
        Self { request_id, locals: Locals { get_session } }
    }

    pub fn locals(&self) -> Locals { self.locals.clone() }

    pub fn close(&self) { self.locals.get_session.close(); }
}

impl Drop for RequestContext {
    fn drop(&mut self) { self.close(); }
}

impl<S: Send + Sync> FromRequestParts<S> for Locals {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Locals>()
            .cloned()
            .ok_or_else(|| AppError::internal("locals_missing", "request locals were not installed for this route"))
    }
}
