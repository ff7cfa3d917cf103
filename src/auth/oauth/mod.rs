//! OAuth 2.0 authorization-code login with Yandex and VK
//!
//! `start` hands out the provider redirect and a state nonce, `complete`
//! checks the nonce, exchanges the code, fetches the profile, resolves the
//! local account and issues a session. Nothing is written to storage until
//! the provider has returned a profile.

pub mod provider;
pub mod state;

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub use provider::{
    build_http_client, HttpOAuthProvider, OAuthProvider, ProviderEndpoints, ProviderKind,
    ProviderProfile, ProviderToken,
};
pub use state::OAuthStateStore;

use crate::auth::session::{Session, SessionIssuer};
use crate::auth::user::User;
use crate::config::ServerConfig;
use crate::error::{OAuthError, PortalError, Result};
use crate::security_logger::{log_security_event, SecurityEvent};
use crate::storage::SharedStorage;

/// Where to send the browser, and the nonce to mirror in the state cookie
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub state: String,
}

/// Query parameters of a provider callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

pub struct OAuthFlow {
    providers: HashMap<ProviderKind, Arc<dyn OAuthProvider>>,
    states: Arc<OAuthStateStore>,
    storage: SharedStorage,
    sessions: SessionIssuer,
}

impl OAuthFlow {
    pub fn new(states: Arc<OAuthStateStore>, storage: SharedStorage, sessions: SessionIssuer) -> Self {
        Self {
            providers: HashMap::new(),
            states,
            storage,
            sessions,
        }
    }

    /// Flow with an HTTP provider for every provider configured in `config`
    pub fn from_config(
        config: &ServerConfig,
        client: reqwest::Client,
        states: Arc<OAuthStateStore>,
        storage: SharedStorage,
        sessions: SessionIssuer,
    ) -> Result<Self> {
        let mut flow = Self::new(states, storage, sessions);
        for kind in ProviderKind::all() {
            if let Some(credentials) = config.provider(kind) {
                let provider = HttpOAuthProvider::new(kind, client.clone(), credentials.clone())?;
                flow = flow.with_provider(Arc::new(provider));
                log::info!("OAuth provider enabled: {}", kind);
            }
        }
        Ok(flow)
    }

    pub fn with_provider(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn states(&self) -> &Arc<OAuthStateStore> {
        &self.states
    }

    /// Configured provider for `kind`; an unconfigured one is unknown
    pub fn provider(&self, kind: ProviderKind) -> std::result::Result<&Arc<dyn OAuthProvider>, OAuthError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| OAuthError::UnknownProvider(kind.to_string()))
    }

    /// Begin a login: store a fresh nonce and build the provider URL
    pub async fn start(&self, kind: ProviderKind) -> Result<AuthorizationRedirect> {
        let provider = self.provider(kind)?;
        let state = self.states.issue(kind).await?;
        Ok(AuthorizationRedirect {
            url: provider.authorization_url(&state),
            state,
        })
    }

    /// Finish a login from the provider callback
    pub async fn complete(
        &self,
        kind: ProviderKind,
        params: CallbackParams,
        cookie_state: Option<&str>,
    ) -> Result<Session> {
        let provider = self.provider(kind)?;

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(OAuthError::MissingCode)?;

        self.states
            .consume(kind, params.state.as_deref(), cookie_state)
            .await?;

        let profile = match fetch_identity(provider.as_ref(), &code).await {
            Ok(profile) => profile,
            Err(e) => {
                log_security_event(SecurityEvent::OAuthUpstreamFailure {
                    provider: kind.to_string(),
                    error: e.to_string(),
                })
                .await;
                return Err(e.into());
            }
        };

        let user = self.resolve_user(kind, profile).await?;

        log_security_event(SecurityEvent::AuthenticationSuccess {
            user_id: user.id.to_string(),
            method: kind.to_string(),
        })
        .await;

        self.sessions.start(user).await
    }

    /// Find the account linked to the provider identity, creating it on first login
    async fn resolve_user(&self, kind: ProviderKind, profile: ProviderProfile) -> Result<User> {
        let users = self.storage.user_storage();

        if let Some(user) = users
            .find_user_by_provider_id(kind, &profile.provider_user_id)
            .await?
        {
            return self.refresh_profile(kind, user, profile).await;
        }

        let mut user = User::from_provider(
            kind,
            profile.provider_user_id.clone(),
            profile.display_name.clone(),
        );
        user.avatar_url = profile.avatar_url.clone();

        // The email is attached only while no other account holds it
        if let Some(email) = profile.email.as_deref().map(str::to_lowercase) {
            if users.find_user_by_email(&email).await?.is_none() {
                user.email = Some(email);
            }
        }

        match users.create_user(&user).await {
            Ok(()) => {
                log_security_event(SecurityEvent::AccountCreated {
                    user_id: user.id.to_string(),
                    method: kind.to_string(),
                })
                .await;
                Ok(user)
            }
            Err(PortalError::Conflict(_)) => {
                // Either a concurrent first login created the identity, or the email was claimed meanwhile
                if let Some(existing) = users
                    .find_user_by_provider_id(kind, &profile.provider_user_id)
                    .await?
                {
                    return Ok(existing);
                }
                user.email = None;
                users.create_user(&user).await?;
                Ok(user)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_profile(
        &self,
        kind: ProviderKind,
        mut user: User,
        profile: ProviderProfile,
    ) -> Result<User> {
        let mut changed = false;

        if let Some(name) = profile.display_name {
            if name != user.display_name {
                user.display_name = name;
                changed = true;
            }
        }
        if profile.avatar_url.is_some() && profile.avatar_url != user.avatar_url {
            user.avatar_url = profile.avatar_url;
            changed = true;
        }

        if changed {
            user.touch();
            self.storage.user_storage().update_user(&user).await?;
            log::debug!("Updated profile of user {} from {}", user.id, kind);
        }
        Ok(user)
    }
}

async fn fetch_identity(
    provider: &dyn OAuthProvider,
    code: &str,
) -> std::result::Result<ProviderProfile, OAuthError> {
    let token = provider.exchange_code(code).await?;
    provider.fetch_profile(&token).await
}
