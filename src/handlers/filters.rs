//! Access control filters for protected routes

use std::convert::Infallible;
use warp::{Filter, Rejection};

use super::reject;
use crate::auth::token::extract_bearer_token;
use crate::auth::Identity;
use crate::config::TokenTransport;
use crate::constants::ACCESS_TOKEN_COOKIE;
use crate::error::{PortalError, TokenError};
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::state::AppState;

/// Hand a clone of the application state to the handler
pub fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Verify the access token and extract the caller's identity
pub fn with_identity(
    state: AppState,
) -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::cookie::optional(ACCESS_TOKEN_COOKIE))
        .and(with_state(state))
        .and_then(
            |header: Option<String>, cookie: Option<String>, state: AppState| async move {
                authenticate(&state, header, cookie).await.map_err(reject)
            },
        )
}

/// Like [`with_identity`], but only admins pass
pub fn with_admin(
    state: AppState,
) -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    with_identity(state).and_then(|identity: Identity| async move {
        if identity.role.is_admin() {
            Ok(identity)
        } else {
            log_security_event(SecurityEvent::PermissionDenied {
                user_id: identity.user_id.to_string(),
                resource: "admin".to_string(),
            })
            .await;
            Err(reject(PortalError::Forbidden))
        }
    })
}

async fn authenticate(
    state: &AppState,
    header: Option<String>,
    cookie: Option<String>,
) -> Result<Identity, PortalError> {
    let token = match state.config.token_transport {
        TokenTransport::Bearer => header.as_deref().and_then(extract_bearer_token),
        TokenTransport::Cookie => cookie.filter(|c| !c.is_empty()),
    };

    let Some(token) = token else {
        log_security_event(SecurityEvent::TokenValidationFailed {
            reason: "no access token presented".to_string(),
        })
        .await;
        return Err(PortalError::Unauthorized);
    };

    match state.tokens().verify_access_token(&token) {
        Ok(claims) => Ok(claims.into()),
        Err(e) => {
            log_security_event(SecurityEvent::TokenValidationFailed {
                reason: e.to_string(),
            })
            .await;
            Err(match e {
                TokenError::Signing(_) => PortalError::Token(e),
                _ => PortalError::Unauthorized,
            })
        }
    }
}
