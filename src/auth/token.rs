use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::user::UserRole;
use crate::clock::SharedClock;
use crate::config::ServerConfig;
use crate::error::TokenError;

/// The only algorithm access tokens may carry
const ACCESS_TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Access token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: Uuid,
    pub role: UserRole,
    /// Issued at (UTC timestamp, seconds)
    pub iat: i64,
    /// Expiration time (UTC timestamp, seconds)
    pub exp: i64,
}

/// Issues and verifies signed, short-lived access tokens
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    secret_usable: bool,
    ttl: Duration,
    clock: SharedClock,
}

impl TokenCodec {
    /// Creates a codec for the HS256 `secret`
    pub fn new(secret: &str, ttl: Duration, clock: SharedClock) -> Self {
        let mut validation = Validation::new(ACCESS_TOKEN_ALGORITHM);
        validation.algorithms = vec![ACCESS_TOKEN_ALGORITHM];
        // Expiry is judged against the injected clock in `verify_access_token`
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            secret_usable: !secret.trim().is_empty(),
            ttl,
            clock,
        }
    }

    pub fn from_config(config: &ServerConfig, clock: SharedClock) -> Self {
        Self::new(&config.jwt_secret, config.access_token_ttl, clock)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Signs `{user_id, role, iat, exp = iat + ttl}`
    pub fn issue_access_token(&self, user_id: Uuid, role: UserRole) -> Result<String, TokenError> {
        if !self.secret_usable {
            return Err(TokenError::Signing("signing secret is empty".to_string()));
        }

        let iat = self.clock.now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| TokenError::Signing("access token lifetime out of range".to_string()))?;
        let claims = AccessClaims {
            user_id,
            role,
            iat,
            exp,
        };

        encode(&Header::new(ACCESS_TOKEN_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies signature, algorithm and expiry, returning the claims
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        check_header_algorithm(token)?;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(classify_decode_error)?;

        if self.clock.now().timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

/// Rejects any token whose header names an algorithm other than HS256,
/// including `none`, before the signature is looked at
fn check_header_algorithm(token: &str) -> Result<(), TokenError> {
    let header_segment = token
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or(TokenError::Malformed)?;
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_segment.trim_end_matches('='))
        .map_err(|_| TokenError::Malformed)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;

    match header.get("alg").and_then(|alg| alg.as_str()) {
        Some("HS256") => Ok(()),
        Some(other) => {
            log::debug!("Rejected token asserting algorithm {}", other);
            Err(TokenError::InvalidSignature)
        }
        None => Err(TokenError::Malformed),
    }
}

fn classify_decode_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, FixedClock};
    use chrono::Utc;
    use std::sync::Arc;

    const SECRET: &str = "unit-codec-key-Wc4Rf6Hy1Pd5Gs0AjZq8Lm3V";

    #[test]
    fn test_issue_and_verify() {
        let codec = TokenCodec::new(SECRET, Duration::from_secs(900), system_clock());
        let user_id = Uuid::new_v4();
        let token = codec.issue_access_token(user_id, UserRole::Admin).unwrap();

        let claims = codec.verify_access_token(&token).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_expires_exactly_at_exp() {
        let clock = FixedClock::new(Utc::now());
        let codec = TokenCodec::new(SECRET, Duration::from_secs(60), Arc::new(clock.clone()));
        let token = codec.issue_access_token(Uuid::new_v4(), UserRole::User).unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert!(codec.verify_access_token(&token).is_ok());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(codec.verify_access_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_empty_secret_cannot_sign() {
        let codec = TokenCodec::new("", Duration::from_secs(60), system_clock());
        let result = codec.issue_access_token(Uuid::new_v4(), UserRole::User);
        assert!(matches!(result, Err(TokenError::Signing(_))));
    }

    #[test]
    fn test_oversized_lifetime_cannot_sign() {
        let codec = TokenCodec::new(SECRET, Duration::from_secs(u64::MAX), system_clock());
        let result = codec.issue_access_token(Uuid::new_v4(), UserRole::User);
        assert!(matches!(result, Err(TokenError::Signing(_))));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = TokenCodec::new(SECRET, Duration::from_secs(60), system_clock());
        assert_eq!(codec.verify_access_token(""), Err(TokenError::Malformed));
        assert_eq!(codec.verify_access_token("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(codec.verify_access_token("a.b.c"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc".to_string()));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }
}
