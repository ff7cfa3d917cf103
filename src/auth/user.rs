use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::oauth::ProviderKind;
use crate::constants::DEFAULT_DISPLAY_NAME;
use crate::error::PortalError;

/// Coarse authorization tag carried in access tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(PortalError::StorageError(format!("unknown role '{}'", other))),
        }
    }
}

/// Account record as persisted by the storage layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Local login name (local accounts only)
    pub username: Option<String>,
    pub email: Option<String>,
    /// Argon2 PHC string; never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub yandex_id: Option<String>,
    pub vk_id: Option<String>,
    pub display_name: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a local account with email/password credentials
    pub fn local(username: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            display_name: username.clone(),
            username: Some(username),
            email: Some(email),
            password_hash: Some(password_hash),
            yandex_id: None,
            vk_id: None,
            phone: None,
            avatar_url: None,
            role: UserRole::User,
            region: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an account linked to exactly one OAuth provider
    pub fn from_provider(
        provider: ProviderKind,
        provider_user_id: String,
        display_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let mut user = Self {
            id: Uuid::new_v4(),
            username: None,
            email: None,
            password_hash: None,
            yandex_id: None,
            vk_id: None,
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            phone: None,
            avatar_url: None,
            role: UserRole::User,
            region: None,
            created_at: now,
            updated_at: now,
        };
        user.set_provider_id(provider, provider_user_id);
        user
    }

    pub fn provider_id(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Yandex => self.yandex_id.as_deref(),
            ProviderKind::Vk => self.vk_id.as_deref(),
        }
    }

    pub fn set_provider_id(&mut self, provider: ProviderKind, id: String) {
        match provider {
            ProviderKind::Yandex => self.yandex_id = Some(id),
            ProviderKind::Vk => self.vk_id = Some(id),
        }
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Client-facing view of a user; carries no credential material
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            phone: user.phone.clone(),
            region: user.region.clone(),
            avatar_url: user.avatar_url.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}
