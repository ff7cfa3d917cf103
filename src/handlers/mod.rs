//! HTTP API: route composition and error mapping

pub mod auth;
pub mod cookies;
pub mod filters;
pub mod oauth;
pub mod users;

use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

pub use filters::{with_admin, with_identity, with_state};

use crate::auth::oauth::CallbackParams;
use crate::constants::{API_PREFIX, OAUTH_STATE_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::error::{OAuthError, PortalError, TokenError};
use crate::security::with_api_security_headers;
use crate::state::AppState;

const JSON_BODY_LIMIT: u64 = 16 * 1024;

/// A domain error carried through warp's rejection chain
#[derive(Debug)]
pub struct ApiRejection(pub PortalError);

impl warp::reject::Reject for ApiRejection {}

pub fn reject(error: PortalError) -> Rejection {
    warp::reject::custom(ApiRejection(error))
}

/// Every route of the service, with errors mapped and security headers applied
pub fn routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let api = warp::path(API_PREFIX).and(
        account_routes(state.clone())
            .or(oauth_routes(state.clone()))
            .unify()
            .or(user_routes(state))
            .unify()
            .or(health_route())
            .unify(),
    );

    health_route()
        .or(api)
        .unify()
        .recover(handle_rejection)
        .map(|reply| with_api_security_headers(reply))
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(JSON_BODY_LIMIT).and(warp::body::json())
}

fn account_routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let register = warp::path!("register")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(auth::register);

    let login = warp::path!("login")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(auth::login);

    let refresh = warp::path!("refresh")
        .and(warp::post())
        .and(warp::cookie::optional(REFRESH_TOKEN_COOKIE))
        .and(with_state(state.clone()))
        .and_then(auth::refresh);

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(warp::cookie::optional(REFRESH_TOKEN_COOKIE))
        .and(with_state(state))
        .and_then(auth::logout);

    register.or(login).unify().or(refresh).unify().or(logout).unify()
}

fn oauth_routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let start = warp::path!("auth" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(oauth::start);

    let callback = warp::path!("auth" / String / "callback")
        .and(warp::get())
        .and(warp::query::<CallbackParams>())
        .and(warp::cookie::optional(OAUTH_STATE_COOKIE))
        .and(with_state(state))
        .and_then(oauth::callback);

    start.or(callback).unify()
}

fn user_routes(state: AppState) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let me = warp::path!("me")
        .and(warp::get())
        .and(with_identity(state.clone()))
        .and(with_state(state.clone()))
        .and_then(users::me);

    let admin_users = warp::path!("admin" / "users")
        .and(warp::get())
        .and(with_admin(state.clone()))
        .and(with_state(state))
        .and_then(users::list);

    me.or(admin_users).unify()
}

fn health_route() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response()
    })
}

/// Status and client-facing message for a domain error
pub fn error_status(error: &PortalError) -> (StatusCode, String) {
    let generic = |status: StatusCode, message: &str| (status, message.to_string());

    match error {
        PortalError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        PortalError::InvalidCredentials => {
            generic(StatusCode::UNAUTHORIZED, "invalid email or password")
        }
        PortalError::Unauthorized
        | PortalError::RefreshToken(_)
        | PortalError::Token(TokenError::InvalidSignature)
        | PortalError::Token(TokenError::Expired)
        | PortalError::Token(TokenError::Malformed) => generic(StatusCode::UNAUTHORIZED, "unauthorized"),
        PortalError::Forbidden => generic(StatusCode::FORBIDDEN, "forbidden"),
        PortalError::NotFound(_) | PortalError::OAuth(OAuthError::UnknownProvider(_)) => {
            generic(StatusCode::NOT_FOUND, "not found")
        }
        PortalError::Conflict(_) => generic(StatusCode::CONFLICT, "conflict"),
        PortalError::OAuth(OAuthError::MissingCode) => {
            generic(StatusCode::BAD_REQUEST, "authorization code missing")
        }
        PortalError::OAuth(OAuthError::StateMismatch) => {
            generic(StatusCode::BAD_REQUEST, "invalid oauth state")
        }
        PortalError::OAuth(OAuthError::ExchangeFailed(_))
        | PortalError::OAuth(OAuthError::ProfileFetchFailed(_)) => {
            generic(StatusCode::BAD_GATEWAY, "provider unavailable")
        }
        PortalError::Token(TokenError::Signing(_))
        | PortalError::StorageError(_)
        | PortalError::ConfigError(_)
        | PortalError::SystemError(_) => {
            generic(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

/// Turn any rejection into a JSON `{"error": ...}` reply
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiRejection(error)) = err.find::<ApiRejection>() {
        let (status, message) = error_status(error);
        if status.is_server_error() {
            log::error!("Request failed with {}: {}", status, error);
        } else {
            log::debug!("Request rejected with {}: {}", status, error);
        }
        (status, message)
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::InvalidQuery>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "invalid request".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "length required".to_string())
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message })),
        status,
    ))
}
