//! Security-focused logging module to track authentication events

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

use crate::error::RefreshTokenError;

/// Log target for every security event
pub const SECURITY_TARGET: &str = "security";

/// Types of security events to track
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    // Authentication events
    AuthenticationFailed { subject: Option<String>, reason: String },
    AuthenticationSuccess { user_id: String, method: String },
    AccountCreated { user_id: String, method: String },
    TokenValidationFailed { reason: String },

    // Refresh token lifecycle
    RefreshTokenRejected { user_id: Option<String>, kind: RefreshTokenError },
    RefreshTokenRotated { user_id: String },
    RefreshTokenRevoked { user_id: String },
    RefreshRotationConflict { user_id: String },

    // Authorization events
    PermissionDenied { user_id: String, resource: String },

    // OAuth flow
    OAuthStateMismatch { provider: String, reason: String },
    OAuthUpstreamFailure { provider: String, error: String },

    // System security
    ConfigurationWarning { component: String, warning: String },
}

impl SecurityEvent {
    fn key(&self) -> &'static str {
        match self {
            SecurityEvent::AuthenticationFailed { .. } => "auth_failed",
            SecurityEvent::AuthenticationSuccess { .. } => "auth_success",
            SecurityEvent::AccountCreated { .. } => "account_created",
            SecurityEvent::TokenValidationFailed { .. } => "token_validation_failed",
            SecurityEvent::RefreshTokenRejected { .. } => "refresh_rejected",
            SecurityEvent::RefreshTokenRotated { .. } => "refresh_rotated",
            SecurityEvent::RefreshTokenRevoked { .. } => "refresh_revoked",
            SecurityEvent::RefreshRotationConflict { .. } => "refresh_conflict",
            SecurityEvent::PermissionDenied { .. } => "permission_denied",
            SecurityEvent::OAuthStateMismatch { .. } => "oauth_state_mismatch",
            SecurityEvent::OAuthUpstreamFailure { .. } => "oauth_upstream_failure",
            SecurityEvent::ConfigurationWarning { .. } => "config_warning",
        }
    }

    fn emit(&self) {
        match self {
            SecurityEvent::AuthenticationFailed { subject, reason } => {
                log::warn!(target: SECURITY_TARGET, "Authentication failed - Subject: {:?}, Reason: {}", subject, reason);
            }
            SecurityEvent::AuthenticationSuccess { user_id, method } => {
                log::info!(target: SECURITY_TARGET, "Authentication success - User: {}, Method: {}", user_id, method);
            }
            SecurityEvent::AccountCreated { user_id, method } => {
                log::info!(target: SECURITY_TARGET, "Account created - User: {}, Method: {}", user_id, method);
            }
            SecurityEvent::TokenValidationFailed { reason } => {
                log::warn!(target: SECURITY_TARGET, "Access token rejected - Reason: {}", reason);
            }
            SecurityEvent::RefreshTokenRejected { user_id, kind } => match kind {
                // Presenting a revoked token is the signature of replay
                RefreshTokenError::Revoked => {
                    log::error!(target: SECURITY_TARGET, "Revoked refresh token presented - User: {:?}", user_id);
                }
                RefreshTokenError::Expired => {
                    log::info!(target: SECURITY_TARGET, "Expired refresh token presented - User: {:?}", user_id);
                }
                RefreshTokenError::NotFound => {
                    log::warn!(target: SECURITY_TARGET, "Unknown or superseded refresh token presented");
                }
            },
            SecurityEvent::RefreshTokenRotated { user_id } => {
                log::debug!(target: SECURITY_TARGET, "Refresh token rotated - User: {}", user_id);
            }
            SecurityEvent::RefreshTokenRevoked { user_id } => {
                log::info!(target: SECURITY_TARGET, "Refresh token revoked - User: {}", user_id);
            }
            SecurityEvent::RefreshRotationConflict { user_id } => {
                log::warn!(target: SECURITY_TARGET, "Concurrent refresh rotation lost - User: {}", user_id);
            }
            SecurityEvent::PermissionDenied { user_id, resource } => {
                log::warn!(target: SECURITY_TARGET, "Permission denied - User: {}, Resource: {}", user_id, resource);
            }
            SecurityEvent::OAuthStateMismatch { provider, reason } => {
                log::warn!(target: SECURITY_TARGET, "OAuth state rejected - Provider: {}, Reason: {}", provider, reason);
            }
            SecurityEvent::OAuthUpstreamFailure { provider, error } => {
                log::error!(target: SECURITY_TARGET, "OAuth provider failure - Provider: {}, Error: {}", provider, error);
            }
            SecurityEvent::ConfigurationWarning { component, warning } => {
                log::warn!(target: SECURITY_TARGET, "Configuration warning - Component: {}, Warning: {}", component, warning);
            }
        }
    }
}

/// Counts security events and raises an alert line when a threshold is hit
pub struct SecurityLogger {
    event_counts: RwLock<HashMap<&'static str, usize>>,
    alert_thresholds: HashMap<&'static str, usize>,
}

impl SecurityLogger {
    pub fn new() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("auth_failed", 5);
        alert_thresholds.insert("token_validation_failed", 10);
        alert_thresholds.insert("refresh_rejected", 5);
        alert_thresholds.insert("permission_denied", 20);
        alert_thresholds.insert("oauth_state_mismatch", 3);
        alert_thresholds.insert("oauth_upstream_failure", 5);

        Self {
            event_counts: RwLock::new(HashMap::new()),
            alert_thresholds,
        }
    }

    /// Record an event, alerting once its threshold is reached
    pub async fn record(&self, event: &SecurityEvent) {
        let key = event.key();
        let mut counts = self.event_counts.write().await;
        let count = counts.entry(key).or_insert(0);
        *count += 1;

        if let Some(&threshold) = self.alert_thresholds.get(key) {
            if *count >= threshold {
                log::error!(target: SECURITY_TARGET, "SECURITY ALERT: {} events of type '{}' detected", count, key);
                log::error!(target: SECURITY_TARGET, "Sample event: {:?}", event);
                *count = 0;
            }
        }
    }

    /// Get event statistics
    pub async fn get_event_stats(&self) -> HashMap<&'static str, usize> {
        self.event_counts.read().await.clone()
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Global security logger instance
static SECURITY_LOGGER: OnceLock<Arc<SecurityLogger>> = OnceLock::new();

/// Initialize the global security logger
pub fn init_security_logger() {
    SECURITY_LOGGER.get_or_init(|| Arc::new(SecurityLogger::new()));
}

pub fn get_security_logger() -> Option<Arc<SecurityLogger>> {
    SECURITY_LOGGER.get().cloned()
}

/// Log a security event, counting it when the global logger is initialized
pub async fn log_security_event(event: SecurityEvent) {
    event.emit();
    if let Some(logger) = get_security_logger() {
        logger.record(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_resets_counter() {
        let logger = SecurityLogger::new();
        let event = SecurityEvent::OAuthStateMismatch {
            provider: "vk".to_string(),
            reason: "cookie missing".to_string(),
        };

        logger.record(&event).await;
        logger.record(&event).await;
        assert_eq!(logger.get_event_stats().await.get("oauth_state_mismatch"), Some(&2));

        logger.record(&event).await;
        assert_eq!(logger.get_event_stats().await.get("oauth_state_mismatch"), Some(&0));
    }
}
