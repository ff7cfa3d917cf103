//! Opaque, server-tracked refresh tokens with in-place rotation
//!
//! A refresh token row keeps its identity for the whole session. Rotation
//! swaps the stored hash and expiry with a compare-and-swap on the previous
//! hash, so a superseded token no longer matches any row and a rotation that
//! loses a race is reported as a conflict.

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{PortalError, RefreshTokenError, Result};
use crate::security::{generate_token, hash_token, TOKEN_BYTES};
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::storage::{SharedStorage, StoredRefreshToken};

/// Result of a successful rotation
#[derive(Debug, Clone)]
pub struct RotatedToken {
    /// New raw token; only ever handed to the client in a cookie
    pub token: String,
    pub user_id: Uuid,
}

pub struct RefreshTokenStore {
    storage: SharedStorage,
    ttl: ChronoDuration,
    clock: SharedClock,
}

impl RefreshTokenStore {
    pub fn new(storage: SharedStorage, ttl: Duration, clock: SharedClock) -> Result<Self> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| PortalError::ConfigError(format!("Refresh token TTL out of range: {}", e)))?;
        Ok(Self { storage, ttl, clock })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or_default()
    }

    /// Create a new refresh token for `user_id` and return its raw value
    pub async fn issue(&self, user_id: Uuid) -> Result<String> {
        let token = generate_token(TOKEN_BYTES)?;
        let now = self.clock.now();

        let row = StoredRefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&token),
            expires_at: now + self.ttl,
            revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.storage.refresh_token_storage().create_refresh_token(&row).await?;

        Ok(token)
    }

    /// Return the owner of a live token
    pub async fn validate(&self, token: &str) -> Result<Uuid> {
        let row = self.lookup(token).await?;
        Ok(row.user_id)
    }

    /// Validate `old`, then replace it with a fresh token on the same row
    pub async fn rotate(&self, old: &str) -> Result<RotatedToken> {
        let row = self.lookup(old).await?;

        let token = generate_token(TOKEN_BYTES)?;
        let now = self.clock.now();
        let result = self
            .storage
            .refresh_token_storage()
            .update_refresh_token(&row.token_hash, &hash_token(&token), now + self.ttl, now)
            .await;

        match result {
            Ok(()) => {
                log_security_event(SecurityEvent::RefreshTokenRotated {
                    user_id: row.user_id.to_string(),
                })
                .await;
                Ok(RotatedToken {
                    token,
                    user_id: row.user_id,
                })
            }
            Err(PortalError::Conflict(msg)) => {
                log_security_event(SecurityEvent::RefreshRotationConflict {
                    user_id: row.user_id.to_string(),
                })
                .await;
                Err(PortalError::Conflict(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke a token; unknown tokens are ignored
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let owner = self
            .storage
            .refresh_token_storage()
            .revoke_refresh_token(&hash_token(token))
            .await?;

        if let Some(user_id) = owner {
            log_security_event(SecurityEvent::RefreshTokenRevoked {
                user_id: user_id.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn lookup(&self, token: &str) -> Result<StoredRefreshToken> {
        let found = self
            .storage
            .refresh_token_storage()
            .find_refresh_token(&hash_token(token))
            .await?;

        let (kind, owner) = match found {
            None => (RefreshTokenError::NotFound, None),
            Some(row) if row.revoked => (RefreshTokenError::Revoked, Some(row.user_id)),
            Some(row) if self.clock.now() >= row.expires_at => {
                (RefreshTokenError::Expired, Some(row.user_id))
            }
            Some(row) => return Ok(row),
        };

        log_security_event(SecurityEvent::RefreshTokenRejected {
            user_id: owner.map(|id| id.to_string()),
            kind,
        })
        .await;
        Err(PortalError::RefreshToken(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::MemoryStorageProvider;
    use chrono::Utc;
    use std::sync::Arc;

    fn store_with_clock() -> (RefreshTokenStore, FixedClock) {
        let clock = FixedClock::new(Utc::now());
        let store = RefreshTokenStore::new(
            Arc::new(MemoryStorageProvider::new()),
            Duration::from_secs(30 * 24 * 3600),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (store, clock)
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let (store, _) = store_with_clock();
        let user_id = Uuid::new_v4();
        let token = store.issue(user_id).await.unwrap();
        assert_eq!(store.validate(&token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn test_unknown_token_not_found() {
        let (store, _) = store_with_clock();
        let result = store.validate("never-issued").await;
        assert!(matches!(result, Err(PortalError::RefreshToken(RefreshTokenError::NotFound))));
    }

    #[tokio::test]
    async fn test_expiry_is_exclusive() {
        let (store, clock) = store_with_clock();
        let token = store.issue(Uuid::new_v4()).await.unwrap();

        clock.advance(ChronoDuration::days(30) - ChronoDuration::seconds(1));
        assert!(store.validate(&token).await.is_ok());

        clock.advance(ChronoDuration::seconds(1));
        let result = store.validate(&token).await;
        assert!(matches!(result, Err(PortalError::RefreshToken(RefreshTokenError::Expired))));
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let (store, _) = store_with_clock();
        let token = store.issue(Uuid::new_v4()).await.unwrap();
        store.revoke(&token).await.unwrap();

        let result = store.validate(&token).await;
        assert!(matches!(result, Err(PortalError::RefreshToken(RefreshTokenError::Revoked))));

        // unknown tokens are ignored
        store.revoke("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_supersedes_old_token() {
        let (store, _) = store_with_clock();
        let user_id = Uuid::new_v4();
        let first = store.issue(user_id).await.unwrap();

        let rotated = store.rotate(&first).await.unwrap();
        assert_eq!(rotated.user_id, user_id);
        assert_ne!(rotated.token, first);
        assert_eq!(store.validate(&rotated.token).await.unwrap(), user_id);

        let reuse = store.rotate(&first).await;
        assert!(matches!(reuse, Err(PortalError::RefreshToken(RefreshTokenError::NotFound))));
    }

    #[tokio::test]
    async fn test_rotation_extends_expiry() {
        let (store, clock) = store_with_clock();
        let token = store.issue(Uuid::new_v4()).await.unwrap();

        clock.advance(ChronoDuration::days(20));
        let rotated = store.rotate(&token).await.unwrap();

        clock.advance(ChronoDuration::days(20));
        assert!(store.validate(&rotated.token).await.is_ok());
    }
}
