//! Yandex and VK login redirects and callbacks

use warp::http::header::LOCATION;
use warp::http::{HeaderValue, StatusCode};
use warp::reply::Response;
use warp::{Rejection, Reply};

use super::{cookies, reject};
use crate::auth::oauth::CallbackParams;
use crate::auth::ProviderKind;
use crate::constants::OAUTH_STATE_COOKIE;
use crate::error::{PortalError, Result};
use crate::state::AppState;

fn redirect(location: &str) -> Result<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|e| PortalError::SystemError(format!("Invalid redirect location: {}", e)))?;
    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}

pub async fn start(provider: String, state: AppState) -> std::result::Result<Response, Rejection> {
    begin_login(&provider, &state).await.map_err(reject)
}

async fn begin_login(provider: &str, state: &AppState) -> Result<Response> {
    let kind: ProviderKind = provider.parse()?;
    let authorization = state.oauth.start(kind).await?;

    log::debug!("Redirecting to {} for login", kind);
    let response = redirect(&authorization.url)?;
    cookies::attach(response, &[cookies::oauth_state(&state.config, &authorization.state)])
}

pub async fn callback(
    provider: String,
    params: CallbackParams,
    cookie_state: Option<String>,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    finish_login(&provider, params, cookie_state, &state)
        .await
        .map_err(reject)
}

async fn finish_login(
    provider: &str,
    params: CallbackParams,
    cookie_state: Option<String>,
    state: &AppState,
) -> Result<Response> {
    let kind: ProviderKind = provider.parse()?;
    let session = state
        .oauth
        .complete(kind, params, cookie_state.as_deref())
        .await?;

    let response = redirect(&state.config.frontend_url)?;
    cookies::attach(
        response,
        &[
            cookies::access_token(&state.config, &session.access_token),
            cookies::refresh_token(&state.config, &session.refresh_token),
            cookies::cleared(&state.config, OAUTH_STATE_COOKIE),
        ],
    )
}
