//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

pub const ENV_HTTP_PORT: &str = "SESSION_LOCALS_HTTP_PORT";
pub const ENV_SESSION_TTL_SECS: &str = "SESSION_LOCALS_SESSION_TTL_SECS";
pub const ENV_PROVIDER: &str = "SESSION_LOCALS_PROVIDER";
pub const ENV_PROVIDER_URL: &str = "SESSION_LOCALS_PROVIDER_URL";
pub const ENV_PROVIDER_TIMEOUT_MS: &str = "SESSION_LOCALS_PROVIDER_TIMEOUT_MS";
pub const ENV_USERS_FILE: &str = "SESSION_LOCALS_USERS_FILE";
pub const ENV_COOKIE_SECURE: &str = "SESSION_LOCALS_COOKIE_SECURE";
pub const ENV_ADMIN_PASSWORD: &str = "SESSION_LOCALS_ADMIN_PASSWORD";
pub const ENV_DATABASE_URL: &str = "SESSION_LOCALS_DATABASE_URL";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://movies.db?mode=rwc";
/// Upper bound for session lifetimes: one year.
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Which identity provider backs `get_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Http { url: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub session_ttl: Duration,
    pub provider: ProviderKind,
    pub provider_timeout: Duration,
    pub users_file: Option<PathBuf>,
    pub cookie_secure: bool,
    /// Only used to seed an empty local user store.
    pub admin_password: Option<String>,
    /// SQLite URL for the movies API; `None` disables the `/movies` routes.
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 7878,
            session_ttl: Duration::from_secs(60 * 60),
            provider: ProviderKind::Local,
            provider_timeout: Duration::from_millis(2000),
            users_file: None,
            cookie_secure: true,
            admin_password: None,
            database_url: Some(DEFAULT_DATABASE_URL.to_string()),
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| anyhow!("{} must be a number, got '{}'", key, raw))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got '{}'", key, raw)),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults, malformed ones are errors.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = get(ENV_HTTP_PORT) { cfg.http_port = parse_num(ENV_HTTP_PORT, &v)?; }
        if let Some(v) = get(ENV_SESSION_TTL_SECS) {
            let secs: u64 = parse_num(ENV_SESSION_TTL_SECS, &v)?;
            if secs == 0 || secs > MAX_SESSION_TTL_SECS {
                bail!("{} must be between 1 and {} seconds, got {}", ENV_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS, secs);
            }
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = get(ENV_PROVIDER_TIMEOUT_MS) {
            cfg.provider_timeout = Duration::from_millis(parse_num(ENV_PROVIDER_TIMEOUT_MS, &v)?);
        }
        if let Some(v) = get(ENV_COOKIE_SECURE) { cfg.cookie_secure = parse_bool(ENV_COOKIE_SECURE, &v)?; }
        cfg.users_file = get(ENV_USERS_FILE).filter(|s| !s.trim().is_empty()).map(PathBuf::from);
        cfg.admin_password = get(ENV_ADMIN_PASSWORD).filter(|s| !s.is_empty());
        if let Some(v) = get(ENV_DATABASE_URL) {
            // empty or "none" turns the movies API off
            let v = v.trim();
            cfg.database_url = if v.is_empty() || v.eq_ignore_ascii_case("none") { None } else { Some(v.to_string()) };
        }

        let kind = get(ENV_PROVIDER).unwrap_or_else(|| "local".to_string());
        cfg.provider = match kind.trim().to_ascii_lowercase().as_str() {
            "local" => ProviderKind::Local,
            "http" => {
                let Some(url) = get(ENV_PROVIDER_URL).filter(|s| !s.trim().is_empty()) else {
                    bail!("{}=http requires {}", ENV_PROVIDER, ENV_PROVIDER_URL);
                };
                ProviderKind::Http { url }
            }
            other => bail!("unknown {} '{}', expected 'local' or 'http'", ENV_PROVIDER, other),
        };
        Ok(cfg)
    }
}
