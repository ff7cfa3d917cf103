//! In-memory storage implementation for development and testing
//!
//! Each table lives behind a single `RwLock`, so uniqueness checks and
//! compare-and-swap updates happen under one write guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::*;
use crate::auth::oauth::ProviderKind;
use crate::auth::user::User;
use crate::error::{PortalError, Result};

#[derive(Default)]
struct UserTables {
    users: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
    by_username: HashMap<String, Uuid>,
    by_yandex: HashMap<String, Uuid>,
    by_vk: HashMap<String, Uuid>,
}

impl UserTables {
    fn get_by(&self, index: &HashMap<String, Uuid>, key: &str) -> Option<User> {
        index.get(key).and_then(|id| self.users.get(id)).cloned()
    }

    /// Conflict if any unique field of `user` is held by a different user
    fn check_unique(&self, user: &User) -> Result<()> {
        let taken = |index: &HashMap<String, Uuid>, key: &Option<String>| {
            key.as_ref()
                .and_then(|k| index.get(k))
                .is_some_and(|owner| *owner != user.id)
        };

        if taken(&self.by_username, &user.username) {
            return Err(PortalError::Conflict("Username already exists".to_string()));
        }
        if taken(&self.by_email, &user.email) {
            return Err(PortalError::Conflict("Email already exists".to_string()));
        }
        if taken(&self.by_yandex, &user.yandex_id) || taken(&self.by_vk, &user.vk_id) {
            return Err(PortalError::Conflict("Provider identity already linked".to_string()));
        }
        Ok(())
    }

    fn unindex(&mut self, user: &User) {
        let drop_key = |index: &mut HashMap<String, Uuid>, key: &Option<String>| {
            if let Some(k) = key {
                index.remove(k);
            }
        };
        drop_key(&mut self.by_username, &user.username);
        drop_key(&mut self.by_email, &user.email);
        drop_key(&mut self.by_yandex, &user.yandex_id);
        drop_key(&mut self.by_vk, &user.vk_id);
    }

    fn index(&mut self, user: &User) {
        let add_key = |index: &mut HashMap<String, Uuid>, key: &Option<String>| {
            if let Some(k) = key {
                index.insert(k.clone(), user.id);
            }
        };
        add_key(&mut self.by_username, &user.username);
        add_key(&mut self.by_email, &user.email);
        add_key(&mut self.by_yandex, &user.yandex_id);
        add_key(&mut self.by_vk, &user.vk_id);
    }
}

/// In-memory combined storage provider
#[derive(Default)]
pub struct MemoryStorageProvider {
    users: RwLock<UserTables>,
    // token_hash -> row
    refresh_tokens: RwLock<HashMap<String, StoredRefreshToken>>,
    oauth_states: RwLock<HashMap<String, StoredOAuthState>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn user_storage(&self) -> &dyn UserStorage {
        self
    }

    fn refresh_token_storage(&self) -> &dyn RefreshTokenStorage {
        self
    }

    fn oauth_state_storage(&self) -> &dyn OAuthStateStorage {
        self
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<bool> {
        // Memory storage is always healthy
        Ok(true)
    }

    async fn close(&self) {
        log::debug!("Memory storage closed");
    }
}

#[async_trait]
impl UserStorage for MemoryStorageProvider {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.users.read().await;
        Ok(tables.get_by(&tables.by_email, email))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.users.read().await;
        Ok(tables.get_by(&tables.by_username, username))
    }

    async fn find_user_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_user_id: &str,
    ) -> Result<Option<User>> {
        let tables = self.users.read().await;
        let index = match provider {
            ProviderKind::Yandex => &tables.by_yandex,
            ProviderKind::Vk => &tables.by_vk,
        };
        Ok(tables.get_by(index, provider_user_id))
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut tables = self.users.write().await;

        if tables.users.contains_key(&user.id) {
            return Err(PortalError::Conflict(format!("User {} already exists", user.id)));
        }
        tables.check_unique(user)?;

        tables.index(user);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut tables = self.users.write().await;

        let previous = tables
            .users
            .get(&user.id)
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("User {} not found", user.id)))?;
        tables.check_unique(user)?;

        tables.unindex(&previous);
        tables.index(user);
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let tables = self.users.read().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn count_admins(&self) -> Result<u64> {
        let tables = self.users.read().await;
        Ok(tables.users.values().filter(|u| u.role.is_admin()).count() as u64)
    }
}

#[async_trait]
impl RefreshTokenStorage for MemoryStorageProvider {
    async fn create_refresh_token(&self, token: &StoredRefreshToken) -> Result<()> {
        let mut tokens = self.refresh_tokens.write().await;
        if tokens.contains_key(&token.token_hash) {
            return Err(PortalError::Conflict("Refresh token already exists".to_string()));
        }
        tokens.insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<StoredRefreshToken>> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn update_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tokens = self.refresh_tokens.write().await;

        let current = match tokens.get(old_hash) {
            Some(row) if !row.revoked && row.expires_at > now => row.clone(),
            _ => {
                return Err(PortalError::Conflict(
                    "Refresh token changed concurrently".to_string(),
                ))
            }
        };
        if tokens.contains_key(new_hash) {
            return Err(PortalError::Conflict("Refresh token already exists".to_string()));
        }

        tokens.remove(old_hash);
        tokens.insert(
            new_hash.to_string(),
            StoredRefreshToken {
                token_hash: new_hash.to_string(),
                expires_at: new_expires_at,
                updated_at: now,
                ..current
            },
        );
        Ok(())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let mut tokens = self.refresh_tokens.write().await;
        Ok(tokens.get_mut(token_hash).map(|row| {
            row.revoked = true;
            row.updated_at = Utc::now();
            row.user_id
        }))
    }
}

#[async_trait]
impl OAuthStateStorage for MemoryStorageProvider {
    async fn store_oauth_state(&self, state: &StoredOAuthState) -> Result<()> {
        let mut states = self.oauth_states.write().await;
        if states.contains_key(&state.state) {
            return Err(PortalError::Conflict("OAuth state already exists".to_string()));
        }
        states.insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn consume_oauth_state(&self, state: &str) -> Result<Option<StoredOAuthState>> {
        Ok(self.oauth_states.write().await.remove(state))
    }

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut states = self.oauth_states.write().await;
        let before = states.len();
        states.retain(|_, state| state.expires_at > now);
        Ok(before - states.len())
    }
}
