use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::config::OAuthClientConfig;
use crate::error::{OAuthError, PortalError, Result};

const VK_API_VERSION: &str = "5.199";

/// Supported third-party identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Yandex,
    Vk,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Yandex => "yandex",
            ProviderKind::Vk => "vk",
        }
    }

    pub fn all() -> [ProviderKind; 2] {
        [ProviderKind::Yandex, ProviderKind::Vk]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = OAuthError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "yandex" => Ok(ProviderKind::Yandex),
            "vk" => Ok(ProviderKind::Vk),
            other => Err(OAuthError::UnknownProvider(other.to_string())),
        }
    }
}

/// Endpoint set of one provider; overridable so tests can point at a mock
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub scope: String,
}

impl ProviderEndpoints {
    pub fn yandex() -> Self {
        Self {
            authorize_url: "https://oauth.yandex.ru/authorize".to_string(),
            token_url: "https://oauth.yandex.ru/token".to_string(),
            profile_url: "https://login.yandex.ru/info".to_string(),
            scope: "login:email login:info".to_string(),
        }
    }

    pub fn vk() -> Self {
        Self {
            authorize_url: "https://oauth.vk.com/authorize".to_string(),
            token_url: "https://oauth.vk.com/access_token".to_string(),
            profile_url: "https://api.vk.com/method/users.get".to_string(),
            scope: "email".to_string(),
        }
    }

    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Yandex => Self::yandex(),
            ProviderKind::Vk => Self::vk(),
        }
    }

    /// Point every endpoint at `base` (e.g. a mock server), keeping paths
    pub fn rebased(kind: ProviderKind, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let defaults = Self::for_kind(kind);
        Self {
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            profile_url: format!("{}/profile", base),
            scope: defaults.scope,
        }
    }
}

/// Provider access token obtained from the code exchange
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub access_token: String,
    /// VK returns the email next to the token rather than in the profile
    pub email: Option<String>,
}

/// Normalized identity returned by any provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub provider_user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// One OAuth 2.0 authorization-code provider
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Authorization URL the browser is redirected to
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> std::result::Result<ProviderToken, OAuthError>;

    async fn fetch_profile(
        &self,
        token: &ProviderToken,
    ) -> std::result::Result<ProviderProfile, OAuthError>;
}

/// Build the shared outbound client with a bounded timeout and no retries
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PortalError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// Yandex and VK over plain HTTPS, differing only in endpoints and payloads
pub struct HttpOAuthProvider {
    kind: ProviderKind,
    client: reqwest::Client,
    credentials: OAuthClientConfig,
    authorize_url: Url,
    token_url: Url,
    profile_url: Url,
    scope: String,
}

impl HttpOAuthProvider {
    pub fn new(
        kind: ProviderKind,
        client: reqwest::Client,
        credentials: OAuthClientConfig,
    ) -> Result<Self> {
        Self::with_endpoints(kind, client, credentials, ProviderEndpoints::for_kind(kind))
    }

    pub fn with_endpoints(
        kind: ProviderKind,
        client: reqwest::Client,
        credentials: OAuthClientConfig,
        endpoints: ProviderEndpoints,
    ) -> Result<Self> {
        let parse = |name: &str, value: &str| {
            Url::parse(value).map_err(|e| {
                PortalError::ConfigError(format!("Invalid {} {} URL '{}': {}", kind, name, value, e))
            })
        };

        Ok(Self {
            kind,
            client,
            authorize_url: parse("authorize", &endpoints.authorize_url)?,
            token_url: parse("token", &endpoints.token_url)?,
            profile_url: parse("profile", &endpoints.profile_url)?,
            scope: endpoints.scope,
            credentials,
        })
    }

    async fn fetch_yandex_profile(
        &self,
        token: &ProviderToken,
    ) -> std::result::Result<ProviderProfile, OAuthError> {
        let response = self
            .client
            .get(self.profile_url.clone())
            .query(&[("format", "json")])
            .header(AUTHORIZATION, format!("OAuth {}", token.access_token))
            .send()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::ProfileFetchFailed(format!("status {}", status)));
        }

        let info: YandexUserInfo = response
            .json()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(format!("invalid body: {}", e)))?;

        if info.id.trim().is_empty() {
            return Err(OAuthError::ProfileFetchFailed("empty user id".to_string()));
        }

        let avatar_url = match (&info.default_avatar_id, info.is_avatar_empty) {
            (Some(avatar_id), Some(false) | None) if !avatar_id.is_empty() => Some(format!(
                "https://avatars.yandex.net/get-yapic/{}/islands-200",
                avatar_id
            )),
            _ => None,
        };

        Ok(ProviderProfile {
            provider_user_id: info.id,
            display_name: non_blank(info.display_name).or_else(|| non_blank(info.real_name)),
            email: non_blank(info.default_email),
            avatar_url,
        })
    }

    async fn fetch_vk_profile(
        &self,
        token: &ProviderToken,
    ) -> std::result::Result<ProviderProfile, OAuthError> {
        let response = self
            .client
            .get(self.profile_url.clone())
            .query(&[
                ("fields", "photo_200,email"),
                ("access_token", token.access_token.as_str()),
                ("v", VK_API_VERSION),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::ProfileFetchFailed(format!("status {}", status)));
        }

        let body: VkUsersResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(format!("invalid body: {}", e)))?;

        // VK reports API errors with a 200 status
        if let Some(error) = body.error {
            return Err(OAuthError::ProfileFetchFailed(format!(
                "VK error {}: {}",
                error.error_code, error.error_msg
            )));
        }

        let user = body
            .response
            .and_then(|users| users.into_iter().next())
            .ok_or_else(|| OAuthError::ProfileFetchFailed("empty users.get response".to_string()))?;

        let full_name = format!("{} {}", user.first_name.trim(), user.last_name.trim());

        Ok(ProviderProfile {
            provider_user_id: user.id.to_string(),
            display_name: non_blank(Some(full_name)),
            email: non_blank(token.email.clone()),
            avatar_url: non_blank(user.photo_200),
        })
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &self.credentials.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", state);
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> std::result::Result<ProviderToken, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::ExchangeFailed(format!("status {}", status)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::ExchangeFailed(format!("invalid body: {}", e)))?;

        match non_blank(body.access_token) {
            Some(access_token) => Ok(ProviderToken {
                access_token,
                email: non_blank(body.email),
            }),
            None => Err(OAuthError::ExchangeFailed(format!(
                "no access_token in response (error: {})",
                body.error.as_deref().unwrap_or("none")
            ))),
        }
    }

    async fn fetch_profile(
        &self,
        token: &ProviderToken,
    ) -> std::result::Result<ProviderProfile, OAuthError> {
        match self.kind {
            ProviderKind::Yandex => self.fetch_yandex_profile(token).await,
            ProviderKind::Vk => self.fetch_vk_profile(token).await,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    email: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YandexUserInfo {
    #[serde(default)]
    id: String,
    display_name: Option<String>,
    real_name: Option<String>,
    default_email: Option<String>,
    default_avatar_id: Option<String>,
    is_avatar_empty: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct VkUsersResponse {
    response: Option<Vec<VkUser>>,
    error: Option<VkApiError>,
}

#[derive(Debug, Deserialize)]
struct VkUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    photo_200: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VkApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}
