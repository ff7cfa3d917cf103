//! Profile and admin user listing

use serde::Serialize;
use warp::reply::Response;
use warp::{Rejection, Reply};

use super::reject;
use crate::auth::{Identity, UserProfile};
use crate::error::{PortalError, Result};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserProfile>,
    pub count: usize,
}

pub async fn me(identity: Identity, state: AppState) -> std::result::Result<Response, Rejection> {
    current_profile(identity, &state).await.map_err(reject)
}

async fn current_profile(identity: Identity, state: &AppState) -> Result<Response> {
    let user = state
        .storage
        .user_storage()
        .find_user_by_id(identity.user_id)
        .await?
        .ok_or_else(|| PortalError::NotFound(format!("user {}", identity.user_id)))?;

    Ok(warp::reply::json(&user.profile()).into_response())
}

pub async fn list(identity: Identity, state: AppState) -> std::result::Result<Response, Rejection> {
    log::info!("Admin {} listed users", identity.user_id);
    list_users(&state).await.map_err(reject)
}

async fn list_users(state: &AppState) -> Result<Response> {
    let users: Vec<UserProfile> = state
        .storage
        .user_storage()
        .list_users()
        .await?
        .iter()
        .map(|user| user.profile())
        .collect();

    Ok(warp::reply::json(&UserListResponse {
        count: users.len(),
        users,
    })
    .into_response())
}
