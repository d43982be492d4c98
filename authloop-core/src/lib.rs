//! # Authloop Core
//!
//! Core library for the authloop OAuth2 helper.
//! Provides the localhost callback listener, token lifecycle management,
//! pluggable token storage, the provider HTTP client, and configuration.

pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
pub mod store;
pub mod token;

// Re-export commonly used types at the crate root.
pub use client::{BrowserOpener, HttpOAuthClient, OAuthClient, SystemBrowser};
pub use config::{DEFAULT_CALLBACK_PORT, OAuthConfig, load_config};
pub use error::{AuthError, ConfigError, Result};
pub use listener::{DEFAULT_CALLBACK_TIMEOUT_SECS, ListenerConfig, wait_for_callback};
pub use manager::{Authenticator, TokenManager};
pub use store::{JsonTokenStore, MemoryTokenStore, TokenStore};
pub use token::{DEFAULT_EXPIRY_SKEW_SECS, Token};
