//! Abstract storage interfaces for pluggable backends
//!
//! Every operation fails with `NotFound`, `Conflict` (unique or
//! compare-and-swap violation) or `StorageError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::oauth::ProviderKind;
use crate::auth::user::User;
use crate::error::Result;

/// Refresh token row; only the SHA-256 of the token is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pending OAuth authorization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOAuthState {
    pub state: String,
    pub provider: ProviderKind,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// User data storage interface
#[async_trait]
pub trait UserStorage: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_user_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_user_id: &str,
    ) -> Result<Option<User>>;

    /// Insert a new user; `Conflict` when username, email or a provider id is taken
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Replace a stored user; `NotFound` when absent
    async fn update_user(&self, user: &User) -> Result<()>;

    /// All users, oldest first
    async fn list_users(&self) -> Result<Vec<User>>;

    async fn count_admins(&self) -> Result<u64>;
}

/// Refresh token storage interface
#[async_trait]
pub trait RefreshTokenStorage: Send + Sync {
    async fn create_refresh_token(&self, token: &StoredRefreshToken) -> Result<()>;

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<StoredRefreshToken>>;

    /// Compare-and-swap rotation: replaces hash and expiry only while the row
    /// still carries `old_hash`, is not revoked and has not expired at `now`.
    /// Anything else is a `Conflict`.
    async fn update_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Mark a token revoked, returning the owner when a row matched
    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<Option<Uuid>>;
}

/// OAuth state nonce storage interface
#[async_trait]
pub trait OAuthStateStorage: Send + Sync {
    async fn store_oauth_state(&self, state: &StoredOAuthState) -> Result<()>;

    /// Remove and return the state atomically; a second call gets `None`
    async fn consume_oauth_state(&self, state: &str) -> Result<Option<StoredOAuthState>>;

    /// Drop states that expired before `now`
    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Combined storage provider interface
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn user_storage(&self) -> &dyn UserStorage;

    fn refresh_token_storage(&self) -> &dyn RefreshTokenStorage;

    fn oauth_state_storage(&self) -> &dyn OAuthStateStorage;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Health check for the storage backend
    async fn health_check(&self) -> Result<bool>;

    /// Release connections; called once during shutdown
    async fn close(&self);
}

pub type SharedStorage = Arc<dyn StorageProvider>;
