use axum::http::{header, HeaderMap};

pub const SESSION_COOKIE: &str = "session_locals";

/// Credential material captured from a request when its context is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Cookie(String),
    Bearer(String),
}

impl Credential {
    pub fn token(&self) -> &str {
        match self {
            Credential::Cookie(t) | Credential::Bearer(t) => t.as_str(),
        }
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE).iter() {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name { return Some(v.to_string()); }
            }
        }
    }
    None
}

fn parse_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") { return None; }
    Some(token.trim().to_string())
}

/// Session cookie first, then `Authorization: Bearer`. Empty values count as absent.
pub fn credential_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<Credential> {
    if let Some(tok) = parse_cookie(headers, cookie_name).filter(|t| !t.is_empty()) {
        return Some(Credential::Cookie(tok));
    }
    parse_bearer(headers).filter(|t| !t.is_empty()).map(Credential::Bearer)
}
