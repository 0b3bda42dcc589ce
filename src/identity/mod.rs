//! Request-scoped identity: credentials captured from the request, the identity
//! providers that turn them into sessions, and the per-request locals that resolve
//! the current session lazily and at most once.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod credential;
mod provider;
mod resolver;
mod request_context;

pub use principal::{Principal, Attrs};
pub use session::{Session, SessionToken, SessionManager};
pub use credential::{Credential, SESSION_COOKIE, credential_from_headers, parse_cookie};
pub use provider::{
    IdentityProvider, LocalIdentityProvider, HttpIdentityProvider, ProviderError, LoginRequest, LoginResponse,
};
pub use resolver::{SessionResolver, ResolverState, ResolveError, Resolution};
pub use request_context::{RequestContext, Locals};
