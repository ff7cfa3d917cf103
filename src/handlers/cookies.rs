//! `Set-Cookie` values for session and OAuth state cookies

use warp::http::header::SET_COOKIE;
use warp::http::HeaderValue;
use warp::reply::Response;

use crate::config::ServerConfig;
use crate::constants::{ACCESS_TOKEN_COOKIE, OAUTH_STATE_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::{PortalError, Result};

/// Covers `/api/refresh` and `/api/logout`, the only readers of the refresh cookie
const SESSION_PATH: &str = "/api";
const OAUTH_PATH: &str = "/api/auth";
const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

fn build(name: &str, value: &str, path: &str, same_site: SameSite, max_age: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; HttpOnly; SameSite={}; Max-Age={}",
        name,
        value,
        path,
        same_site.as_str(),
        max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn access_token(config: &ServerConfig, token: &str) -> String {
    build(
        ACCESS_TOKEN_COOKIE,
        token,
        ROOT_PATH,
        SameSite::Lax,
        config.access_token_ttl.as_secs(),
        config.secure_cookies,
    )
}

pub fn refresh_token(config: &ServerConfig, token: &str) -> String {
    build(
        REFRESH_TOKEN_COOKIE,
        token,
        SESSION_PATH,
        SameSite::Strict,
        config.refresh_token_ttl.as_secs(),
        config.secure_cookies,
    )
}

pub fn oauth_state(config: &ServerConfig, state: &str) -> String {
    build(
        OAUTH_STATE_COOKIE,
        state,
        OAUTH_PATH,
        SameSite::Lax,
        config.oauth_state_ttl.as_secs(),
        config.secure_cookies,
    )
}

/// Expire a cookie previously set by one of the builders above
pub fn cleared(config: &ServerConfig, name: &str) -> String {
    let (path, same_site) = match name {
        ACCESS_TOKEN_COOKIE => (ROOT_PATH, SameSite::Lax),
        REFRESH_TOKEN_COOKIE => (SESSION_PATH, SameSite::Strict),
        _ => (OAUTH_PATH, SameSite::Lax),
    };
    build(name, "", path, same_site, 0, config.secure_cookies)
}

/// Append every cookie as its own `Set-Cookie` header
pub fn attach(mut response: Response, cookies: &[String]) -> Result<Response> {
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| PortalError::SystemError(format!("Invalid cookie value: {}", e)))?;
        response.headers_mut().append(SET_COOKIE, value);
    }
    Ok(response)
}
