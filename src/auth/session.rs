//! Session issuance shared by password login, registration and OAuth

use std::sync::Arc;

use crate::auth::refresh::RefreshTokenStore;
use crate::auth::token::TokenCodec;
use crate::auth::user::User;
use crate::error::{PortalError, Result};
use crate::storage::SharedStorage;

/// Freshly issued credentials for one user
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Clone)]
pub struct SessionIssuer {
    tokens: Arc<TokenCodec>,
    refresh_tokens: Arc<RefreshTokenStore>,
    storage: SharedStorage,
}

impl SessionIssuer {
    pub fn new(
        tokens: Arc<TokenCodec>,
        refresh_tokens: Arc<RefreshTokenStore>,
        storage: SharedStorage,
    ) -> Self {
        Self {
            tokens,
            refresh_tokens,
            storage,
        }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    /// Access token plus a new refresh token for `user`
    pub async fn start(&self, user: User) -> Result<Session> {
        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        let refresh_token = self.refresh_tokens.issue(user.id).await?;
        Ok(Session {
            access_token,
            refresh_token,
            user,
        })
    }

    /// Rotate `refresh_token` and mint an access token from the user's
    /// current record, so role changes apply here
    pub async fn renew(&self, refresh_token: &str) -> Result<Session> {
        let rotated = self.refresh_tokens.rotate(refresh_token).await?;

        let user = self
            .storage
            .user_storage()
            .find_user_by_id(rotated.user_id)
            .await?
            .ok_or_else(|| {
                log::warn!("Refresh token owner {} no longer exists", rotated.user_id);
                PortalError::Unauthorized
            })?;

        let access_token = self.tokens.issue_access_token(user.id, user.role)?;
        Ok(Session {
            access_token,
            refresh_token: rotated.token,
            user,
        })
    }

    /// Revoke the refresh token, if the client presented one
    pub async fn end(&self, refresh_token: Option<&str>) -> Result<()> {
        match refresh_token.filter(|t| !t.is_empty()) {
            Some(token) => self.refresh_tokens.revoke(token).await,
            None => Ok(()),
        }
    }
}
