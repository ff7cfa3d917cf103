//! Local account endpoints: registration, login, refresh and logout

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

use super::{cookies, reject};
use crate::auth::{Session, User};
use crate::config::TokenTransport;
use crate::constants::{
    ACCESS_TOKEN_COOKIE, MAX_EMAIL_LENGTH, MAX_USERNAME_LENGTH, MIN_PASSWORD_LENGTH,
    REFRESH_TOKEN_COOKIE,
};
use crate::error::{PortalError, Result};
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Registration input after trimming and normalization
#[derive(Debug, PartialEq, Eq)]
struct NewAccount {
    username: String,
    email: String,
    phone: Option<String>,
    region: Option<String>,
}

fn validate_registration(request: &RegisterRequest) -> Result<NewAccount> {
    let username = request.username.trim();
    let username_len = username.chars().count();
    if username_len == 0 || username_len > MAX_USERNAME_LENGTH {
        return Err(PortalError::ValidationError(format!(
            "username must be between 1 and {} characters",
            MAX_USERNAME_LENGTH
        )));
    }

    let email = normalize_email(&request.email);
    if email.chars().count() > MAX_EMAIL_LENGTH || !is_valid_email(&email) {
        return Err(PortalError::ValidationError(
            "email must be a valid address".to_string(),
        ));
    }

    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PortalError::ValidationError(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let optional = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Ok(NewAccount {
        username: username.to_string(),
        email,
        phone: optional(&request.phone),
        region: optional(&request.region),
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `local@domain.tld`: one `@`, no whitespace, a dotted domain without empty labels
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

/// Build the JSON session reply; the refresh token only ever travels as a cookie
fn session_reply(state: &AppState, session: &Session, status: StatusCode) -> Result<Response> {
    let body = warp::reply::json(&TokenResponse {
        access_token: session.access_token.clone(),
    });
    let response = warp::reply::with_status(body, status).into_response();

    let mut set = vec![cookies::refresh_token(&state.config, &session.refresh_token)];
    if state.config.token_transport == TokenTransport::Cookie {
        set.push(cookies::access_token(&state.config, &session.access_token));
    }
    cookies::attach(response, &set)
}

pub async fn register(request: RegisterRequest, state: AppState) -> std::result::Result<Response, Rejection> {
    register_account(request, &state).await.map_err(reject)
}

async fn register_account(request: RegisterRequest, state: &AppState) -> Result<Response> {
    let account = validate_registration(&request)?;
    let users = state.storage.user_storage();

    if users.find_user_by_email(&account.email).await?.is_some() {
        return Err(PortalError::Conflict("email already registered".to_string()));
    }
    if users.find_user_by_username(&account.username).await?.is_some() {
        return Err(PortalError::Conflict("username already taken".to_string()));
    }

    let password_hash = state.credentials.hash_password(&request.password).await?;
    let mut user = User::local(account.username, account.email, password_hash);
    user.phone = account.phone;
    user.region = account.region;

    // Unique indexes still catch a concurrent registration here
    users.create_user(&user).await?;

    log_security_event(SecurityEvent::AccountCreated {
        user_id: user.id.to_string(),
        method: "password".to_string(),
    })
    .await;

    let session = state.sessions.start(user).await?;
    session_reply(state, &session, StatusCode::CREATED)
}

pub async fn login(request: LoginRequest, state: AppState) -> std::result::Result<Response, Rejection> {
    login_account(request, &state).await.map_err(reject)
}

async fn login_account(request: LoginRequest, state: &AppState) -> Result<Response> {
    let email = normalize_email(&request.email);
    let user = state.storage.user_storage().find_user_by_email(&email).await?;

    let user = match state.credentials.authenticate(user.as_ref(), &request.password).await {
        Ok(user) => user.clone(),
        Err(e) => {
            log_security_event(SecurityEvent::AuthenticationFailed {
                subject: Some(email),
                reason: "invalid email or password".to_string(),
            })
            .await;
            return Err(e);
        }
    };

    log_security_event(SecurityEvent::AuthenticationSuccess {
        user_id: user.id.to_string(),
        method: "password".to_string(),
    })
    .await;

    let session = state.sessions.start(user).await?;
    session_reply(state, &session, StatusCode::OK)
}

pub async fn refresh(
    refresh_token: Option<String>,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    renew_session(refresh_token, &state).await.map_err(reject)
}

async fn renew_session(refresh_token: Option<String>, state: &AppState) -> Result<Response> {
    let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
        log_security_event(SecurityEvent::AuthenticationFailed {
            subject: None,
            reason: "refresh cookie missing".to_string(),
        })
        .await;
        return Err(PortalError::Unauthorized);
    };

    let session = state.sessions.renew(&token).await?;
    session_reply(state, &session, StatusCode::OK)
}

pub async fn logout(
    refresh_token: Option<String>,
    state: AppState,
) -> std::result::Result<Response, Rejection> {
    end_session(refresh_token, &state).await.map_err(reject)
}

async fn end_session(refresh_token: Option<String>, state: &AppState) -> Result<Response> {
    state.sessions.end(refresh_token.as_deref()).await?;

    let response = StatusCode::NO_CONTENT.into_response();
    cookies::attach(
        response,
        &[
            cookies::cleared(&state.config, REFRESH_TOKEN_COOKIE),
            cookies::cleared(&state.config, ACCESS_TOKEN_COOKIE),
        ],
    )
}
