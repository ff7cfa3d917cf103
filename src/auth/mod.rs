//! Authentication and authorization module

pub mod oauth;
pub mod password;
pub mod refresh;
pub mod session;
pub mod token;
pub mod user;

// Re-export main components
pub use oauth::{OAuthFlow, ProviderKind};
pub use password::CredentialStore;
pub use refresh::{RefreshTokenStore, RotatedToken};
pub use session::{Session, SessionIssuer};
pub use token::{AccessClaims, TokenCodec};
pub use user::{User, UserProfile, UserRole};

use uuid::Uuid;

/// Verified caller identity handed to protected handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.user_id,
            role: claims.role,
        }
    }
}
