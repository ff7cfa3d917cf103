// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const API_PREFIX: &str = "api";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";

// Session lifetimes
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: u64 = 30;
pub const DEFAULT_OAUTH_STATE_TTL_SECS: u64 = 5 * 60;
/// Upper bound for any configured token or state lifetime (ten years)
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

// Outbound calls and shutdown
pub const DEFAULT_OAUTH_HTTP_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

// Cookie names
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

// Account defaults
pub const DEFAULT_DISPLAY_NAME: &str = "Пользователь";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@rural.local";
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_USERNAME_LENGTH: usize = 100;
pub const MAX_EMAIL_LENGTH: usize = 150;
