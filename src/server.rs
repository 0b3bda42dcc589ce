//!
//! session-locals HTTP server
//! --------------------------
//! Axum pipeline that installs per-request locals and a few routes consuming them.
//!
//! Responsibilities:
//! - Build a `RequestContext` for every request and expose its `Locals` to handlers.
//! - Tear the context down when the request finishes or is cancelled.
//! - Login/logout against the local identity provider (cookie-based tokens).
//! - `/session` and `/me` endpoints that resolve the current session through the locals.
//! - `/movies` list backed by SQLite; adding and removing entries requires a session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::{ProviderKind, ServerConfig};
use crate::error::{AppError, AppResult};
use crate::identity::{
    credential_from_headers, HttpIdentityProvider, IdentityProvider, LocalIdentityProvider, Locals, LoginRequest,
    RequestContext, Session, SessionManager, SESSION_COOKIE,
};
use crate::movies::{self, Movie, NewMovie};
use crate::security::UserStore;

/// Shared server state injected into all handlers.
///
/// `provider` backs every request's `get_session`. `local` is set only when the
/// in-process provider is active, enabling `/login` and token revocation on `/logout`.
/// `movies` is unset when no database is configured.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub local: Option<Arc<LocalIdentityProvider>>,
    pub movies: Option<SqlitePool>,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn with_local(local: Arc<LocalIdentityProvider>) -> Self {
        Self { provider: local.clone(), local: Some(local), movies: None, cookie_secure: true }
    }

    pub fn with_provider(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider, local: None, movies: None, cookie_secure: true }
    }

    pub fn with_movies(mut self, pool: SqlitePool) -> Self {
        self.movies = Some(pool);
        self
    }
}

/// Application routes without the locals layer, for callers that stack their own middleware.
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { "session-locals ok" }))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(current_session))
        .route("/me", get(me))
        .route("/movies", get(list_movies).post(add_movie))
        .route("/movies/{id}", delete(remove_movie))
}

/// Wrap `routes` so every request gets its own `RequestContext`; the locals layer is outermost.
pub fn with_locals(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(state.clone(), install_locals))
        .with_state(state)
}

/// Browser clients on other origins call the API with bearer tokens.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

pub fn router(state: AppState) -> Router {
    with_locals(app_routes(), state).layer(cors_layer())
}

/// Create the request's context, hand its locals to the rest of the pipeline, then tear it down.
///
/// If the client disconnects, this future is dropped and the context's `Drop` closes it.
async fn install_locals(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let credential = credential_from_headers(req.headers(), SESSION_COOKIE);
    let ctx = RequestContext::new(state.provider.clone(), credential);
    debug!(
        target: "session_locals::server",
        request_id = %ctx.request_id,
        method = %req.method(),
        path = %req.uri().path(),
        "request context created"
    );
    req.extensions_mut().insert(ctx.locals());
    let resp = next.run(req).await;
    ctx.close();
    resp
}

fn session_cookie(token: &str, secure: bool, max_age_secs: i64) -> AppResult<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly{}; SameSite=Strict; Path=/; Max-Age={}",
        SESSION_COOKIE, token, secure, max_age_secs.max(0)
    ))
    .map_err(|e| AppError::internal("cookie_encoding".to_string(), e.to_string()))
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly{}; SameSite=Strict; Path=/",
        SESSION_COOKIE, secure
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("session_locals=deleted; Max-Age=0; Path=/"))
}

#[derive(Debug, Deserialize)]
struct LoginPayload { username: String, password: String }

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> AppResult<Response> {
    let Some(local) = state.local.as_ref() else {
        return Err(AppError::not_found("login_unsupported", "login is handled by the external identity provider"));
    };
    let resp = local.login(&LoginRequest { username: payload.username, password: payload.password, ip: None })?;
    let sess = resp.session;
    let max_age = (sess.expires_at - sess.issued_at).num_seconds();
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, session_cookie(&sess.token, state.cookie_secure, max_age)?);
    info!(target: "session_locals::server", user = %sess.principal.user_id, sid = %sess.session_id, "login");
    Ok((StatusCode::OK, headers, Json(serde_json::json!({"status": "ok", "expires_at": sess.expires_at}))).into_response())
}

/// No CSRF token round trip: the session cookie is `SameSite=Strict`.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let (Some(local), Some(cred)) = (state.local.as_ref(), credential_from_headers(&headers, SESSION_COOKIE)) {
        if local.logout(cred.token()) {
            debug!(target: "session_locals::server", "session revoked on logout");
        }
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, clear_session_cookie(state.cookie_secure));
    (StatusCode::OK, h, Json(serde_json::json!({"status": "ok"}))).into_response()
}

/// `{"session": Session | null}`; 503 when the provider cannot be reached.
async fn current_session(locals: Locals) -> AppResult<Json<serde_json::Value>> {
    let sess = locals.get_session.resolve().await?;
    Ok(Json(serde_json::json!({"session": sess.as_deref()})))
}

/// The current session, or 401 when there is none.
async fn require_session(locals: &Locals) -> AppResult<Arc<Session>> {
    locals
        .session()
        .await?
        .ok_or_else(|| AppError::auth("unauthenticated", "no active session"))
}

async fn me(locals: Locals) -> AppResult<Json<serde_json::Value>> {
    let sess = require_session(&locals).await?;
    Ok(Json(serde_json::json!({
        "user_id": sess.principal.user_id,
        "roles": sess.principal.roles,
        "attrs": sess.principal.attrs,
        "expires_at": sess.expires_at,
    })))
}

fn movie_store(state: &AppState) -> AppResult<&SqlitePool> {
    state
        .movies
        .as_ref()
        .ok_or_else(|| AppError::not_found("movies_disabled", "no movies database is configured"))
}

async fn list_movies(State(state): State<AppState>) -> AppResult<Json<Vec<Movie>>> {
    let pool = movie_store(&state)?;
    Ok(Json(movies::list(pool).await?))
}

async fn add_movie(State(state): State<AppState>, locals: Locals, Json(payload): Json<NewMovie>) -> AppResult<(StatusCode, Json<Movie>)> {
    let sess = require_session(&locals).await?;
    let pool = movie_store(&state)?;
    if payload.title.trim().is_empty() {
        return Err(AppError::user("title_required", "movie title must not be empty"));
    }
    let movie = movies::insert(pool, &payload, &sess.principal.user_id).await?;
    info!(target: "session_locals::server", user = %movie.user_name, tmdb_id = movie.tmdb_id, "movie added");
    Ok((StatusCode::CREATED, Json(movie)))
}

/// Remove the caller's entries for a TMDB id; admins may remove anyone's.
async fn remove_movie(State(state): State<AppState>, locals: Locals, Path(tmdb_id): Path<i64>) -> AppResult<StatusCode> {
    let sess = require_session(&locals).await?;
    let pool = movie_store(&state)?;
    let owner = if sess.principal.is_admin() { None } else { Some(sess.principal.user_id.as_str()) };
    let removed = movies::delete_by_tmdb_id(pool, tmdb_id, owner).await?;
    if removed == 0 {
        return Err(AppError::not_found("movie_not_found".to_string(), format!("no movie {} to remove", tmdb_id)));
    }
    info!(target: "session_locals::server", user = %sess.principal.user_id, tmdb_id, removed, "movie removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Periodically drop expired local sessions nobody presents again.
fn spawn_session_sweeper(sm: SessionManager, every: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            let removed = sm.prune_expired();
            if removed > 0 { debug!(target: "session_locals::server", removed, "session_sweep"); }
        }
    });
}

/// Build the identity provider selected by `cfg` and the movies store, and wrap them in server state.
pub async fn build_state(cfg: &ServerConfig) -> anyhow::Result<AppState> {
    let mut state = match &cfg.provider {
        ProviderKind::Local => {
            let users = match &cfg.users_file {
                Some(p) => UserStore::load(p).with_context(|| format!("While opening user store {}", p.display()))?,
                None => UserStore::in_memory(),
            };
            let password = match &cfg.admin_password {
                Some(p) => p.clone(),
                None => {
                    if users.is_empty() {
                        warn!(target: "startup", "no admin password configured; seeding admin/admin");
                    }
                    "admin".to_string()
                }
            };
            users.ensure_default_admin("admin", &password)?;
            let local = LocalIdentityProvider::new(Arc::new(users), SessionManager::with_ttl(cfg.session_ttl));
            AppState::with_local(Arc::new(local))
        }
        ProviderKind::Http { url } => {
            let provider = HttpIdentityProvider::new(url, cfg.provider_timeout)?;
            info!(target: "startup", introspect = %provider.introspect_url(), "using HTTP identity provider");
            AppState::with_provider(Arc::new(provider))
        }
    };
    state.cookie_secure = cfg.cookie_secure;
    if let Some(url) = &cfg.database_url {
        let pool = movies::connect(url).await.with_context(|| format!("While opening movies database {}", url))?;
        info!(target: "startup", database = %url, "movies store ready");
        state = state.with_movies(pool);
    }
    Ok(state)
}

/// Start the HTTP server described by `cfg`.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&cfg).await?;
    info!(target: "startup", provider = state.provider.name(), "identity provider ready");
    if let Some(local) = &state.local {
        spawn_session_sweeper(local.sm.clone(), Duration::from_secs(60));
    }
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
