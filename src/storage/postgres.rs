//! PostgreSQL storage backend
//!
//! Runtime-checked queries over a `PgPool`. The expected schema lives in
//! `sql/schema.sql`; nothing here creates or migrates tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use uuid::Uuid;

use super::traits::*;
use crate::auth::oauth::ProviderKind;
use crate::auth::user::{User, UserRole};
use crate::error::{PortalError, Result};

const USER_COLUMNS: &str = "id, username, email, password_hash, yandex_id, vk_id, display_name, \
                            phone, avatar_url, role, region, created_at, updated_at";

pub struct PostgresStorageProvider {
    pool: PgPool,
}

impl PostgresStorageProvider {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| PortalError::StorageError(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user_where(&self, column: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| user_from_row(&row)).transpose()
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        yandex_id: row.try_get("yandex_id")?,
        vk_id: row.try_get("vk_id")?,
        display_name: row.try_get("display_name")?,
        phone: row.try_get("phone")?,
        avatar_url: row.try_get("avatar_url")?,
        role: role.parse::<UserRole>()?,
        region: row.try_get("region")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<StoredRefreshToken> {
    Ok(StoredRefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl StorageProvider for PostgresStorageProvider {
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
        "postgres"
    }

    async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS ok").fetch_one(&self.pool).await?;
        let ok: i32 = row.try_get("ok")?;
        Ok(ok == 1)
    }

    async fn close(&self) {
        self.pool.close().await;
        log::info!("Database pool closed");
    }
}

#[async_trait]
impl UserStorage for PostgresStorageProvider {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.map(|row| user_from_row(&row)).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_user_where("username", username).await
    }

    async fn find_user_by_provider_id(
        &self,
        provider: ProviderKind,
        provider_user_id: &str,
    ) -> Result<Option<User>> {
        let column = match provider {
            ProviderKind::Yandex => "yandex_id",
            ProviderKind::Vk => "vk_id",
        };
        self.find_user_where(column, provider_user_id).await
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let query = r"
            INSERT INTO users
                (id, username, email, password_hash, yandex_id, vk_id, display_name,
                 phone, avatar_url, role, region, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ";
        sqlx::query(query)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.yandex_id)
            .bind(&user.vk_id)
            .bind(&user.display_name)
            .bind(&user.phone)
            .bind(&user.avatar_url)
            .bind(user.role.as_str())
            .bind(&user.region)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let query = r"
            UPDATE users SET
                username = $2, email = $3, password_hash = $4, yandex_id = $5, vk_id = $6,
                display_name = $7, phone = $8, avatar_url = $9, role = $10, region = $11,
                updated_at = $12
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.yandex_id)
            .bind(&user.vk_id)
            .bind(&user.display_name)
            .bind(&user.phone)
            .bind(&user.avatar_url)
            .bind(user.role.as_str())
            .bind(&user.region)
            .bind(user.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!("User {} not found", user.id)));
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn count_admins(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS admins FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        let admins: i64 = row.try_get("admins")?;
        Ok(admins.max(0) as u64)
    }
}

#[async_trait]
impl RefreshTokenStorage for PostgresStorageProvider {
    async fn create_refresh_token(&self, token: &StoredRefreshToken) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, user_id, token_hash, expires_at, revoked, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        sqlx::query(query)
            .bind(token.id)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.expires_at)
            .bind(token.revoked)
            .bind(token.created_at)
            .bind(token.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<StoredRefreshToken>> {
        let query = r"
            SELECT id, user_id, token_hash, expires_at, revoked, created_at, updated_at
            FROM refresh_tokens WHERE token_hash = $1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| refresh_token_from_row(&row)).transpose()
    }

    async fn update_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE refresh_tokens
            SET token_hash = $2, expires_at = $3, updated_at = $4
            WHERE token_hash = $1 AND revoked = FALSE AND expires_at > $4
        ";
        let result = sqlx::query(query)
            .bind(old_hash)
            .bind(new_hash)
            .bind(new_expires_at)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::Conflict(
                "Refresh token changed concurrently".to_string(),
            ));
        }
        Ok(())
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<Option<Uuid>> {
        let query = r"
            UPDATE refresh_tokens SET revoked = TRUE, updated_at = NOW()
            WHERE token_hash = $1
            RETURNING user_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("user_id")).transpose()?)
    }
}

#[async_trait]
impl OAuthStateStorage for PostgresStorageProvider {
    async fn store_oauth_state(&self, state: &StoredOAuthState) -> Result<()> {
        let query = r"
            INSERT INTO oauth_states (state, provider, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&state.state)
            .bind(state.provider.as_str())
            .bind(state.expires_at)
            .bind(state.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_oauth_state(&self, state: &str) -> Result<Option<StoredOAuthState>> {
        let query = r"
            DELETE FROM oauth_states WHERE state = $1
            RETURNING state, provider, expires_at, created_at
        ";
        let row = sqlx::query(query)
            .bind(state)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let provider: String = row.try_get("provider")?;
        let provider = provider
            .parse::<ProviderKind>()
            .map_err(|e| PortalError::StorageError(format!("Corrupt oauth_states row: {}", e)))?;

        Ok(Some(StoredOAuthState {
            state: row.try_get("state")?,
            provider,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
