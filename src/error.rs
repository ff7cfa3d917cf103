use std::error::Error;
use std::fmt;

/// Access token failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The signing secret is unusable or encoding failed
    Signing(String),
    /// Signature or algorithm does not match the configured HS256 scheme
    InvalidSignature,
    /// `now >= exp`
    Expired,
    /// Structure cannot be decoded
    Malformed,
}

/// Refresh token failures, kept distinct for logging even though clients
/// always see the same 401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenError {
    NotFound,
    Revoked,
    Expired,
}

/// OAuth login failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    UnknownProvider(String),
    MissingCode,
    StateMismatch,
    ExchangeFailed(String),
    ProfileFetchFailed(String),
}

#[derive(Debug)]
pub enum PortalError {
    // Validation errors
    ValidationError(String),

    // Authentication errors
    InvalidCredentials,
    Unauthorized,
    Token(TokenError),
    RefreshToken(RefreshTokenError),

    // Authorization errors
    Forbidden,

    // Conflicts (duplicate registration, rotation race)
    Conflict(String),

    // Upstream provider errors
    OAuth(OAuthError),

    // Storage errors
    NotFound(String),
    StorageError(String),

    // Configuration errors
    ConfigError(String),

    // System errors
    SystemError(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signing(msg) => write!(f, "token signing failed: {}", msg),
            Self::InvalidSignature => write!(f, "invalid token signature"),
            Self::Expired => write!(f, "token expired"),
            Self::Malformed => write!(f, "malformed token"),
        }
    }
}

impl fmt::Display for RefreshTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "refresh token not found"),
            Self::Revoked => write!(f, "refresh token revoked"),
            Self::Expired => write!(f, "refresh token expired"),
        }
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider(name) => write!(f, "unknown OAuth provider: {}", name),
            Self::MissingCode => write!(f, "authorization code missing"),
            Self::StateMismatch => write!(f, "OAuth state mismatch"),
            Self::ExchangeFailed(msg) => write!(f, "code exchange failed: {}", msg),
            Self::ProfileFetchFailed(msg) => write!(f, "profile fetch failed: {}", msg),
        }
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::Unauthorized => write!(f, "Unauthorized access"),
            Self::Token(err) => write!(f, "Access token error: {}", err),
            Self::RefreshToken(err) => write!(f, "Refresh token error: {}", err),
            Self::Forbidden => write!(f, "Forbidden: insufficient permissions"),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::OAuth(err) => write!(f, "OAuth error: {}", err),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
        }
    }
}

impl Error for TokenError {}
impl Error for RefreshTokenError {}
impl Error for OAuthError {}
impl Error for PortalError {}

impl From<TokenError> for PortalError {
    fn from(err: TokenError) -> Self {
        PortalError::Token(err)
    }
}

impl From<RefreshTokenError> for PortalError {
    fn from(err: RefreshTokenError) -> Self {
        PortalError::RefreshToken(err)
    }
}

impl From<OAuthError> for PortalError {
    fn from(err: OAuthError) -> Self {
        PortalError::OAuth(err)
    }
}

impl From<sqlx::Error> for PortalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PortalError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db_err)
                if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
            {
                PortalError::Conflict(format!("unique constraint violated: {}", db_err))
            }
            other => PortalError::StorageError(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PortalError {
    fn from(err: tokio::task::JoinError) -> Self {
        PortalError::SystemError(format!("Blocking task failed: {}", err))
    }
}

// Generic result type for the portal
pub type Result<T> = std::result::Result<T, PortalError>;
