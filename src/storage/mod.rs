//! Persistence for users, refresh tokens and OAuth states

pub mod memory;
pub mod postgres;
pub mod traits;

use std::sync::Arc;

pub use memory::MemoryStorageProvider;
pub use postgres::PostgresStorageProvider;
pub use traits::{
    OAuthStateStorage, RefreshTokenStorage, SharedStorage, StorageProvider, StoredOAuthState,
    StoredRefreshToken, UserStorage,
};

use crate::config::ServerConfig;
use crate::error::{PortalError, Result};

/// URL scheme selecting the in-memory backend
pub const MEMORY_URL_SCHEME: &str = "memory://";

/// Open the backend named by `DATABASE_URL`
pub async fn connect(config: &ServerConfig) -> Result<SharedStorage> {
    let url = config.database_url.as_str();

    if url.starts_with(MEMORY_URL_SCHEME) {
        log::warn!("Using in-memory storage; all data is lost on restart");
        return Ok(Arc::new(MemoryStorageProvider::new()));
    }

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let storage =
            PostgresStorageProvider::connect(url, config.database_max_connections).await?;
        log::info!(
            "Connected to PostgreSQL (max {} connections)",
            config.database_max_connections
        );
        return Ok(Arc::new(storage));
    }

    Err(PortalError::ConfigError(
        "DATABASE_URL must start with postgres://, postgresql:// or memory://".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_url_selects_memory_backend() {
        let config = ServerConfig::for_testing();
        let storage = connect(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "memory");
        assert!(storage.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let mut config = ServerConfig::for_testing();
        config.database_url = "mysql://localhost/portal".to_string();
        assert!(matches!(connect(&config).await, Err(PortalError::ConfigError(_))));
    }
}
