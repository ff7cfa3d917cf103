//! Server configuration module
//! Loads the portal configuration once at startup; every component receives
//! it (or the parts it needs) through its constructor.

use crate::auth::oauth::ProviderKind;
use crate::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_ADMIN_EMAIL, DEFAULT_DATABASE_MAX_CONNECTIONS,
    DEFAULT_FRONTEND_URL, DEFAULT_HOST, DEFAULT_OAUTH_HTTP_TIMEOUT_SECS,
    DEFAULT_OAUTH_STATE_TTL_SECS, DEFAULT_PORT, DEFAULT_REFRESH_TOKEN_TTL_DAYS,
    DEFAULT_SHUTDOWN_GRACE_SECS, MAX_TTL_SECS,
};
use crate::error::{PortalError, Result};
use std::env;
use std::time::Duration;

/// Where the access token is read from on protected routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTransport {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// HttpOnly `access_token` cookie
    Cookie,
}

/// Credentials registered with an OAuth provider
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `postgres://...` or `memory://`
    pub database_url: String,
    pub database_max_connections: u32,
    /// HS256 signing secret for access tokens
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub oauth_state_ttl: Duration,
    /// Where OAuth callbacks send the browser after login
    pub frontend_url: String,
    /// Adds `Secure` to every cookie we set
    pub secure_cookies: bool,
    pub token_transport: TokenTransport,
    /// Bound on each outbound call to an OAuth provider
    pub oauth_http_timeout: Duration,
    /// How long in-flight requests may run after a shutdown signal
    pub shutdown_grace: Duration,
    pub yandex: Option<OAuthClientConfig>,
    pub vk: Option<OAuthClientConfig>,
    /// Bootstrap admin, created only when no admin exists and a password is set
    pub admin_email: String,
    pub admin_password: Option<String>,
}

impl ServerConfig {
    /// Configuration with defaults for everything except the two required values.
    /// No secret validation is done here; `from_env` is the startup path.
    pub fn new(jwt_secret: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: database_url.into(),
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            jwt_secret: jwt_secret.into(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_DAYS * 24 * 3600),
            oauth_state_ttl: Duration::from_secs(DEFAULT_OAUTH_STATE_TTL_SECS),
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            secure_cookies: false,
            token_transport: TokenTransport::Bearer,
            oauth_http_timeout: Duration::from_secs(DEFAULT_OAUTH_HTTP_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            yandex: None,
            vk: None,
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            admin_password: None,
        }
    }

    /// Create a test configuration - DANGEROUS: Only for testing!
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self::new(
            "unit-jwt-key-Zq8Lm3Vx7Tb2Nw9Kc4Rf6Hy1Pd5Gs0Aj",
            "memory://",
        )
    }

    /// Validate that the signing secret meets security requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(PortalError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "change-me",
            "default-secret",
            "test-secret",
            "secret",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.to_lowercase().contains(pattern) {
                return Err(PortalError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Please use a secure random secret generated with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        // Ensure some complexity
        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PortalError::ConfigError(
                "JWT secret should contain mixed characters (letters, numbers, symbols) for security".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or_else(|| {
            PortalError::ConfigError(
                "DATABASE_URL environment variable is required (postgres://... or memory://)"
                    .to_string(),
            )
        })?;

        let jwt_secret = get("PORTAL_JWT_SECRET")
            .or_else(|| get("JWT_SECRET"))
            .ok_or_else(|| {
                PortalError::ConfigError(
                    "JWT_SECRET environment variable is required for security. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_jwt_secret(&jwt_secret)?;

        let mut config = Self::new(jwt_secret, database_url);

        if let Some(host) = get("PORTAL_HOST") {
            config.host = host;
        }
        config.port = parse_or(get("PORTAL_PORT").or_else(|| get("PORT")), "PORT", config.port)?;
        config.database_max_connections = parse_or(
            get("DATABASE_MAX_CONNECTIONS"),
            "DATABASE_MAX_CONNECTIONS",
            config.database_max_connections,
        )?;

        config.access_token_ttl = Duration::from_secs(parse_or(
            get("ACCESS_TOKEN_TTL_SECS"),
            "ACCESS_TOKEN_TTL_SECS",
            DEFAULT_ACCESS_TOKEN_TTL_SECS,
        )?);
        let refresh_days: u64 = parse_or(
            get("REFRESH_TOKEN_TTL_DAYS"),
            "REFRESH_TOKEN_TTL_DAYS",
            DEFAULT_REFRESH_TOKEN_TTL_DAYS,
        )?;
        let refresh_secs = refresh_days.checked_mul(24 * 3600).ok_or_else(|| {
            PortalError::ConfigError(format!(
                "REFRESH_TOKEN_TTL_DAYS '{}' is out of range",
                refresh_days
            ))
        })?;
        config.refresh_token_ttl = Duration::from_secs(refresh_secs);
        config.oauth_state_ttl = Duration::from_secs(parse_or(
            get("OAUTH_STATE_TTL_SECS"),
            "OAUTH_STATE_TTL_SECS",
            DEFAULT_OAUTH_STATE_TTL_SECS,
        )?);
        config.oauth_http_timeout = Duration::from_secs(parse_or(
            get("OAUTH_HTTP_TIMEOUT_SECS"),
            "OAUTH_HTTP_TIMEOUT_SECS",
            DEFAULT_OAUTH_HTTP_TIMEOUT_SECS,
        )?);
        config.shutdown_grace = Duration::from_secs(parse_or(
            get("SHUTDOWN_GRACE_SECS"),
            "SHUTDOWN_GRACE_SECS",
            DEFAULT_SHUTDOWN_GRACE_SECS,
        )?);

        if config.access_token_ttl.is_zero() || config.refresh_token_ttl.is_zero() {
            return Err(PortalError::ConfigError(
                "Token lifetimes must be greater than zero".to_string(),
            ));
        }
        for (key, ttl) in [
            ("ACCESS_TOKEN_TTL_SECS", config.access_token_ttl),
            ("REFRESH_TOKEN_TTL_DAYS", config.refresh_token_ttl),
            ("OAUTH_STATE_TTL_SECS", config.oauth_state_ttl),
        ] {
            if ttl.as_secs() > MAX_TTL_SECS {
                return Err(PortalError::ConfigError(format!(
                    "{} exceeds the maximum lifetime of {} seconds",
                    key, MAX_TTL_SECS
                )));
            }
        }

        if let Some(frontend_url) = get("FRONTEND_URL") {
            config.frontend_url = frontend_url;
        }
        url::Url::parse(&config.frontend_url).map_err(|e| {
            PortalError::ConfigError(format!(
                "FRONTEND_URL '{}' is not a valid URL: {}",
                config.frontend_url, e
            ))
        })?;

        // Secure cookies follow the frontend scheme unless set explicitly
        config.secure_cookies = match get("SECURE_COOKIES") {
            Some(v) => v.to_lowercase() == "true" || v == "1",
            None => config.frontend_url.starts_with("https://"),
        };

        config.token_transport = match get("TOKEN_TRANSPORT").map(|v| v.to_lowercase()) {
            None => TokenTransport::Bearer,
            Some(v) if v == "bearer" || v == "header" => TokenTransport::Bearer,
            Some(v) if v == "cookie" => TokenTransport::Cookie,
            Some(other) => {
                return Err(PortalError::ConfigError(format!(
                    "TOKEN_TRANSPORT must be 'bearer' or 'cookie', got '{}'",
                    other
                )))
            }
        };

        config.yandex = load_provider(&get, "YANDEX")?;
        config.vk = load_provider(&get, "VK")?;

        if let Some(email) = get("ADMIN_EMAIL") {
            config.admin_email = email;
        }
        config.admin_password = get("ADMIN_PASSWORD");

        Ok(config)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Client credentials for `kind`, if that provider is configured
    pub fn provider(&self, kind: ProviderKind) -> Option<&OAuthClientConfig> {
        match kind {
            ProviderKind::Yandex => self.yandex.as_ref(),
            ProviderKind::Vk => self.vk.as_ref(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.trim().parse().map_err(|_| {
            PortalError::ConfigError(format!("{} has an invalid value: '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

/// A provider is either fully configured or absent; a partial set is a startup error
fn load_provider<F>(get: &F, prefix: &str) -> Result<Option<OAuthClientConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let id_key = format!("{}_CLIENT_ID", prefix);
    let secret_key = format!("{}_CLIENT_SECRET", prefix);
    let redirect_key = format!("{}_REDIRECT_URI", prefix);

    let (client_id, client_secret, redirect_uri) =
        match (get(&id_key), get(&secret_key), get(&redirect_key)) {
            (None, None, None) => return Ok(None),
            (Some(id), Some(secret), Some(redirect)) => (id, secret, redirect),
            (id, secret, redirect) => {
                let missing: Vec<&str> = [
                    (id_key.as_str(), id.is_none()),
                    (secret_key.as_str(), secret.is_none()),
                    (redirect_key.as_str(), redirect.is_none()),
                ]
                .into_iter()
                .filter(|(_, absent)| *absent)
                .map(|(key, _)| key)
                .collect();
                return Err(PortalError::ConfigError(format!(
                    "{} OAuth is partially configured; missing {}",
                    prefix,
                    missing.join(", ")
                )));
            }
        };

    url::Url::parse(&redirect_uri).map_err(|e| {
        PortalError::ConfigError(format!("{} is not a valid URL: {}", redirect_key, e))
    })?;

    Ok(Some(OAuthClientConfig {
        client_id,
        client_secret,
        redirect_uri,
    }))
}
