//! Portal Auth - authentication and session backend for the rural portal
//!
//! This library provides local accounts with Argon2 passwords, Yandex and VK
//! OAuth login, signed access tokens with rotating refresh tokens, and the
//! warp routes that expose them.

pub mod auth;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod security;
pub mod security_logger;
pub mod state;
pub mod storage;

// Re-export main components
pub use config::{ServerConfig, TokenTransport};
pub use error::{PortalError, Result};
pub use handlers::routes;
pub use state::AppState;
