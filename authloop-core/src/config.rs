//! Provider configuration for the authorization-code flow.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment. Loaded from `~/.config/authloop/config.toml` and/or an
//! explicit file, with `AUTHLOOP_`-prefixed environment variables on top.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default port for the local callback listener.
///
/// Providers usually require the redirect URI to exactly match one
/// registered in the app settings, so a fixed port keeps
/// `http://127.0.0.1:8750/callback` predictable and pre-configurable.
pub const DEFAULT_CALLBACK_PORT: u16 = 8750;

/// OAuth2 provider settings for the authorization-code grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Client identifier issued by the provider.
    pub client_id: String,

    /// Client secret for confidential clients; unset for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Provider base URL; the authorize and token endpoints derive from it.
    pub base_url: String,

    /// Redirect URI registered with the provider.
    pub redirect_uri: String,

    /// Scopes requested during authorization.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            base_url: String::new(),
            redirect_uri: format!("http://127.0.0.1:{DEFAULT_CALLBACK_PORT}/callback"),
            scopes: Vec::new(),
        }
    }
}

impl OAuthConfig {
    /// Authorization endpoint derived from the base URL.
    pub fn authorize_url(&self) -> String {
        format!("{}/oauth/authorize", self.base_url.trim_end_matches('/'))
    }

    /// Token endpoint derived from the base URL.
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url.trim_end_matches('/'))
    }

    /// Check the fields the flow cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() {
            return Err(ConfigError::MissingField {
                field: "client_id".to_string(),
            });
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingField {
                field: "base_url".to_string(),
            });
        }
        if self.redirect_uri.is_empty() {
            return Err(ConfigError::MissingField {
                field: "redirect_uri".to_string(),
            });
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `AUTHLOOP_`)
/// 2. Explicit config file (passed as argument)
/// 3. User config (`~/.config/authloop/config.toml`)
/// 4. Built-in defaults
pub fn load_config(config_file: Option<&Path>) -> Result<OAuthConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(OAuthConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "authloop", "authloop") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Explicit config file
    if let Some(file) = config_file {
        figment = figment.merge(Toml::file(file));
    }

    // Environment variables (AUTHLOOP_CLIENT_ID, AUTHLOOP_BASE_URL, etc.)
    figment = figment.merge(Env::prefixed("AUTHLOOP_"));

    let config: OAuthConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}
