//! Shared application state, built once at startup and cloned into filters

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::oauth::{build_http_client, OAuthFlow, OAuthProvider, OAuthStateStore};
use crate::auth::{CredentialStore, RefreshTokenStore, SessionIssuer, TokenCodec, User, UserRole};
use crate::clock::{system_clock, SharedClock};
use crate::config::ServerConfig;
use crate::constants::DEFAULT_ADMIN_USERNAME;
use crate::error::Result;
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::storage::SharedStorage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub storage: SharedStorage,
    pub credentials: CredentialStore,
    pub sessions: SessionIssuer,
    pub oauth: Arc<OAuthFlow>,
    pub clock: SharedClock,
}

impl AppState {
    /// State with the wall clock, default Argon2 costs and HTTP providers from `config`
    pub fn new(config: ServerConfig, storage: SharedStorage) -> Result<Self> {
        Self::builder(config, storage).build()
    }

    pub fn builder(config: ServerConfig, storage: SharedStorage) -> AppStateBuilder {
        AppStateBuilder {
            config,
            storage,
            clock: None,
            credentials: None,
            providers: Vec::new(),
        }
    }

    pub fn tokens(&self) -> &TokenCodec {
        self.sessions.tokens()
    }

    /// Create the configured admin account when the store has no admin yet.
    /// Returns the new admin's id, or `None` when nothing was created.
    pub async fn ensure_bootstrap_admin(&self) -> Result<Option<Uuid>> {
        let users = self.storage.user_storage();

        if users.count_admins().await? > 0 {
            return Ok(None);
        }

        let Some(password) = self.config.admin_password.as_deref() else {
            log_security_event(SecurityEvent::ConfigurationWarning {
                component: "bootstrap".to_string(),
                warning: "no admin account exists and ADMIN_PASSWORD is not set".to_string(),
            })
            .await;
            return Ok(None);
        };

        let email = self.config.admin_email.trim().to_lowercase();
        if users.find_user_by_email(&email).await?.is_some() {
            log_security_event(SecurityEvent::ConfigurationWarning {
                component: "bootstrap".to_string(),
                warning: format!("{} already belongs to a non-admin account", email),
            })
            .await;
            return Ok(None);
        }

        let password_hash = self.credentials.hash_password(password).await?;
        let mut admin = User::local(DEFAULT_ADMIN_USERNAME.to_string(), email, password_hash);
        admin.role = UserRole::Admin;
        users.create_user(&admin).await?;

        log::info!("Created bootstrap admin {}", admin.id);
        Ok(Some(admin.id))
    }

    /// Periodic purge of expired OAuth states
    pub fn start_cleanup_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.oauth.states().clone().start_cleanup_task(every)
    }
}

/// Overrides for the pieces tests need to control
pub struct AppStateBuilder {
    config: ServerConfig,
    storage: SharedStorage,
    clock: Option<SharedClock>,
    credentials: Option<CredentialStore>,
    providers: Vec<Arc<dyn OAuthProvider>>,
}

impl AppStateBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Register a provider, replacing any configured one of the same kind
    pub fn provider(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = self.config;
        let storage = self.storage;
        let clock = self.clock.unwrap_or_else(system_clock);

        let tokens = Arc::new(TokenCodec::from_config(&config, clock.clone()));
        let refresh_tokens = Arc::new(RefreshTokenStore::new(
            storage.clone(),
            config.refresh_token_ttl,
            clock.clone(),
        )?);
        let sessions = SessionIssuer::new(tokens, refresh_tokens, storage.clone());

        let states = Arc::new(OAuthStateStore::new(
            storage.clone(),
            config.oauth_state_ttl,
            clock.clone(),
        )?);
        let client = build_http_client(config.oauth_http_timeout)?;
        let mut oauth = OAuthFlow::from_config(&config, client, states, storage.clone(), sessions.clone())?;
        for provider in self.providers {
            oauth = oauth.with_provider(provider);
        }

        Ok(AppState {
            config: Arc::new(config),
            storage,
            credentials: self.credentials.unwrap_or_default(),
            sessions,
            oauth: Arc::new(oauth),
            clock,
        })
    }
}
