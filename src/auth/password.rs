//! Password hashing and verification using Argon2id

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::auth::user::User;
use crate::error::{PortalError, Result};

const SALT_BYTES: usize = 16;

/// Hashes and checks local account passwords
///
/// Hashing parameters default to 19 MiB of memory, 2 iterations and one lane.
/// Verification reads the parameters from the stored PHC string, so hashes
/// produced with other parameters keep verifying.
#[derive(Clone)]
pub struct CredentialStore {
    params: Params,
    // Hash compared against when no account matches, so both paths cost the same
    dummy_hash: Arc<OnceCell<String>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::with_params(Params::default())
    }

    /// Store with custom Argon2 cost parameters (tests use cheap ones)
    pub fn with_params(params: Params) -> Self {
        Self {
            params,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Argon2id PHC string with a fresh random salt
    pub async fn hash_password(&self, plaintext: &str) -> Result<String> {
        let mut salt_bytes = [0u8; SALT_BYTES];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|e| PortalError::SystemError(format!("OS random source failed: {}", e)))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| PortalError::SystemError(format!("Salt encoding failed: {}", e)))?;

        let params = self.params.clone();
        let plaintext = plaintext.to_owned();

        tokio::task::spawn_blocking(move || {
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(plaintext.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| PortalError::SystemError(format!("Password hashing failed: {}", e)))
        })
        .await?
    }

    /// Constant-time check of `plaintext` against a stored PHC string.
    /// An unparsable hash never matches.
    pub async fn verify_password(&self, hash: &str, plaintext: &str) -> bool {
        let hash = hash.to_owned();
        let plaintext = plaintext.to_owned();

        let outcome = tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                log::warn!("Stored password hash is unparsable: {}", e);
                false
            }
        })
        .await;

        match outcome {
            Ok(matched) => matched,
            Err(e) => {
                log::error!("Password verification task failed: {}", e);
                false
            }
        }
    }

    /// Check a login attempt against an optional account.
    ///
    /// Unknown accounts and accounts without a local password still run one
    /// verification, and every failure is the same `InvalidCredentials`.
    pub async fn authenticate<'a>(&self, user: Option<&'a User>, plaintext: &str) -> Result<&'a User> {
        let candidate = user.and_then(|u| u.password_hash.as_deref().map(|hash| (u, hash)));

        match candidate {
            Some((user, hash)) => {
                if self.verify_password(hash, plaintext).await {
                    Ok(user)
                } else {
                    Err(PortalError::InvalidCredentials)
                }
            }
            None => {
                match self.dummy_hash().await {
                    Ok(dummy) => {
                        let _ = self.verify_password(dummy, plaintext).await;
                    }
                    Err(e) => log::error!("Could not prepare dummy password hash: {}", e),
                }
                Err(PortalError::InvalidCredentials)
            }
        }
    }

    async fn dummy_hash(&self) -> Result<&String> {
        self.dummy_hash
            .get_or_try_init(|| async {
                let filler = crate::security::generate_token(SALT_BYTES)?;
                self.hash_password(&filler).await
            })
            .await
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_store() -> CredentialStore {
        CredentialStore::with_params(Params::new(1024, 1, 1, None).unwrap())
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let store = cheap_store();
        let hash = store.hash_password("correct horse").await.unwrap();

        assert!(hash.starts_with("$argon2id$v=19$"));
        assert!(store.verify_password(&hash, "correct horse").await);
        assert!(!store.verify_password(&hash, "wrong horse").await);
    }

    #[tokio::test]
    async fn test_same_password_different_salts() {
        let store = cheap_store();
        let a = store.hash_password("repeat").await.unwrap();
        let b = store.hash_password("repeat").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_default_parameters_encoded_in_hash() {
        let store = CredentialStore::new();
        let hash = store.hash_password("slow but fine").await.unwrap();
        assert!(hash.contains("m=19456,t=2,p=1"));
    }

    #[tokio::test]
    async fn test_unparsable_hash_never_matches() {
        let store = cheap_store();
        assert!(!store.verify_password("not-a-phc-string", "anything").await);
        assert!(!store.verify_password("", "").await);
    }

    #[tokio::test]
    async fn test_authenticate_missing_user_is_invalid_credentials() {
        let store = cheap_store();
        let result = store.authenticate(None, "whatever").await;
        assert!(matches!(result, Err(PortalError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_authenticate_provider_only_account() {
        let store = cheap_store();
        let user = User::from_provider(
            crate::auth::oauth::ProviderKind::Yandex,
            "1".to_string(),
            None,
        );
        let result = store.authenticate(Some(&user), "").await;
        assert!(matches!(result, Err(PortalError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_authenticate_success_and_failure() {
        let store = cheap_store();
        let hash = store.hash_password("hunter22").await.unwrap();
        let user = User::local("ivan".to_string(), "ivan@example.ru".to_string(), hash);

        let ok = store.authenticate(Some(&user), "hunter22").await.unwrap();
        assert_eq!(ok.id, user.id);

        let bad = store.authenticate(Some(&user), "hunter23").await;
        assert!(matches!(bad, Err(PortalError::InvalidCredentials)));
    }
}
