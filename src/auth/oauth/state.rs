//! OAuth `state` nonces binding an authorization request to its callback

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;

use super::provider::ProviderKind;
use crate::clock::SharedClock;
use crate::error::{OAuthError, PortalError, Result};
use crate::security::{constant_time_eq, generate_token, TOKEN_BYTES};
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::storage::{SharedStorage, StoredOAuthState};

/// Issues single-use state nonces and checks them on callback
pub struct OAuthStateStore {
    storage: SharedStorage,
    ttl: ChronoDuration,
    clock: SharedClock,
}

impl OAuthStateStore {
    pub fn new(storage: SharedStorage, ttl: Duration, clock: SharedClock) -> Result<Self> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| PortalError::ConfigError(format!("OAuth state TTL out of range: {}", e)))?;
        Ok(Self { storage, ttl, clock })
    }

    /// Generate and persist a nonce for `provider`
    pub async fn issue(&self, provider: ProviderKind) -> Result<String> {
        let state = generate_token(TOKEN_BYTES)?;
        let now = self.clock.now();

        self.storage
            .oauth_state_storage()
            .store_oauth_state(&StoredOAuthState {
                state: state.clone(),
                provider,
                expires_at: now + self.ttl,
                created_at: now,
            })
            .await?;

        Ok(state)
    }

    /// Check the callback's query state against the cookie copy, then consume
    /// the server-side record. Every failure is a `StateMismatch`.
    pub async fn consume(
        &self,
        provider: ProviderKind,
        query_state: Option<&str>,
        cookie_state: Option<&str>,
    ) -> Result<()> {
        let query_state = query_state.filter(|s| !s.is_empty());
        let cookie_state = cookie_state.filter(|s| !s.is_empty());

        let state = match (query_state, cookie_state) {
            (Some(query), Some(cookie)) if constant_time_eq(query, cookie) => query,
            (None, _) => return self.reject(provider, "state parameter missing").await,
            (_, None) => return self.reject(provider, "state cookie missing").await,
            _ => return self.reject(provider, "state differs from cookie").await,
        };

        let stored = self.storage.oauth_state_storage().consume_oauth_state(state).await?;

        match stored {
            None => self.reject(provider, "state unknown or already used").await,
            Some(stored) if stored.provider != provider => {
                self.reject(provider, "state issued for another provider").await
            }
            Some(stored) if self.clock.now() >= stored.expires_at => {
                self.reject(provider, "state expired").await
            }
            Some(_) => Ok(()),
        }
    }

    /// Remove expired nonces, returning how many were dropped
    pub async fn purge_expired(&self) -> Result<usize> {
        self.storage
            .oauth_state_storage()
            .purge_expired_oauth_states(self.clock.now())
            .await
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match self.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => log::debug!("Purged {} expired OAuth states", removed),
                    Err(e) => log::error!("Failed to purge expired OAuth states: {}", e),
                }
            }
        })
    }

    async fn reject(&self, provider: ProviderKind, reason: &str) -> Result<()> {
        log_security_event(SecurityEvent::OAuthStateMismatch {
            provider: provider.to_string(),
            reason: reason.to_string(),
        })
        .await;
        Err(OAuthError::StateMismatch.into())
    }
}
