#![allow(dead_code)]

use argon2::Params;
use warp::hyper::body::Bytes;
use std::sync::Arc;
use warp::http::header::SET_COOKIE;
use warp::http::Response;

use portal_auth::auth::CredentialStore;
use portal_auth::config::ServerConfig;
use portal_auth::state::{AppState, AppStateBuilder};
use portal_auth::storage::MemoryStorageProvider;

pub const SECRET: &str = "Rk7vQ2xL9mWp4Tz8Nb3Hc6Jd1Fg5Ys0A";
pub const FRONTEND_URL: &str = "http://localhost:5173/";

pub fn config() -> ServerConfig {
    let mut config = ServerConfig::new(SECRET, "memory://");
    config.frontend_url = FRONTEND_URL.to_string();
    config
}

/// Argon2 costs low enough for tests
pub fn fast_credentials() -> CredentialStore {
    CredentialStore::with_params(Params::new(1024, 1, 1, None).unwrap())
}

pub fn builder(config: ServerConfig) -> AppStateBuilder {
    AppState::builder(config, Arc::new(MemoryStorageProvider::new())).credentials(fast_credentials())
}

pub fn state() -> AppState {
    builder(config()).build().unwrap()
}

/// Value of the `name` cookie set by the response, if any
pub fn set_cookie(response: &Response<Bytes>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|cookie| cookie.starts_with(&prefix))
        .map(str::to_string)
}

/// Just the value part of the `name` cookie
pub fn cookie_value(response: &Response<Bytes>, name: &str) -> Option<String> {
    set_cookie(response, name).map(|cookie| {
        cookie[name.len() + 1..]
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string()
    })
}

pub fn json(response: &Response<Bytes>) -> serde_json::Value {
    serde_json::from_slice(response.body()).unwrap()
}

/// Whether a browser would send a cookie with this `Set-Cookie` value to
/// `request_path` (RFC 6265 section 5.1.4 path-match)
pub fn sent_to(set_cookie: &str, request_path: &str) -> bool {
    let cookie_path = set_cookie
        .split(';')
        .map(str::trim)
        .find_map(|attr| attr.strip_prefix("Path="))
        .unwrap_or("/");

    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')))
}

/// The `cookie` request header a browser would build from the response's
/// `name` cookie when calling `request_path`
pub fn browser_cookie(response: &Response<Bytes>, name: &str, request_path: &str) -> Option<String> {
    let cookie = set_cookie(response, name)?;
    if !sent_to(&cookie, request_path) {
        return None;
    }
    cookie.split(';').next().map(str::to_string)
}
