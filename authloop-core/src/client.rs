//! OAuth2 capability seams and the HTTP implementation behind them.
//!
//! `OAuthClient` is the small surface the lifecycle engine drives:
//! authorization-URL construction, code-for-token exchange, and refresh.
//! `HttpOAuthClient` implements it against a real provider over `reqwest`;
//! tests substitute their own impls. `BrowserOpener` covers the
//! fire-and-forget browser hop so flows stay drivable without a desktop.

use crate::config::OAuthConfig;
use crate::error::{AuthError, ConfigError, Result};
use crate::token::Token;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Client-side operations of the OAuth2 authorization-code grant.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the URL the user visits to authorize this application.
    fn authorization_url(&self) -> Result<String>;

    /// Exchange the redirect's full callback URL for a token.
    async fn exchange_code(&self, callback_url: &str) -> Result<Token>;

    /// Obtain a fresh token using a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<Token>;
}

/// Hands a URL to the user's browser.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Browser opener backed by the `open` crate.
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Generate a random url-safe state parameter for CSRF protection.
fn generate_state() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Pull `code` and `state` out of a callback URL.
///
/// A provider `error` parameter wins over everything else; a callback
/// without a code is rejected here rather than at the token endpoint.
fn extract_code_and_state(callback_url: &str) -> Result<(String, Option<String>)> {
    let url = url::Url::parse(callback_url).map_err(|e| AuthError::Exchange {
        message: format!("callback URL did not parse: {e}"),
    })?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let detail = error_description.unwrap_or_else(|| "no description given".to_string());
        return Err(AuthError::Exchange {
            message: format!("provider returned '{error}': {detail}"),
        });
    }

    let code = code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::Exchange {
            message: "callback carried no authorization code".to_string(),
        })?;
    Ok((code, state))
}

/// Parse a token endpoint body into a `Token`, deriving `expires_at` from
/// `expires_in` when the provider only sends the relative form.
fn parse_token_body(body: &str) -> std::result::Result<Token, String> {
    let mut token: Token =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON in token response: {e}"))?;
    if token.access_token.is_empty() {
        return Err("token response carried an empty 'access_token'".to_string());
    }
    if token.expires_at.is_none() {
        if let Some(expires_in) = token.extra.get("expires_in").and_then(|v| v.as_i64()) {
            token.expires_at = Some(Utc::now().timestamp() + expires_in);
        }
    }
    Ok(token)
}

/// `OAuthClient` over HTTP for a provider described by `OAuthConfig`.
///
/// Tracks the `state` parameter between building the authorization URL and
/// exchanging the resulting callback, and verifies it on exchange.
pub struct HttpOAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
    pending_state: Mutex<Option<String>>,
}

impl HttpOAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            pending_state: Mutex::new(None),
        }
    }

    /// The provider settings this client was built with.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }
}

#[async_trait]
impl OAuthClient for HttpOAuthClient {
    fn authorization_url(&self) -> Result<String> {
        let mut auth_url =
            url::Url::parse(&self.config.authorize_url()).map_err(|e| ConfigError::Invalid {
                message: format!("authorize URL did not parse: {e}"),
            })?;

        let state = generate_state();
        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_uri);
            params.append_pair("state", &state);
            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
        }
        *self.pending_state.lock().unwrap() = Some(state);

        Ok(auth_url.into())
    }

    async fn exchange_code(&self, callback_url: &str) -> Result<Token> {
        let (code, returned_state) = extract_code_and_state(callback_url)?;

        if let Some(expected) = self.pending_state.lock().unwrap().take() {
            if returned_state.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::StateMismatch);
            }
        }

        let token_url = self.config.token_url();
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code.as_str());
        params.insert("redirect_uri", self.config.redirect_uri.as_str());
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(ref secret) = self.config.client_secret {
            params.insert("client_secret", secret.as_str());
        }

        debug!("exchanging authorization code for a token");
        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Exchange {
                message: format!("token endpoint request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Exchange {
            message: format!("failed to read token response: {e}"),
        })?;
        if !status.is_success() {
            return Err(AuthError::Exchange {
                message: format!("token endpoint returned HTTP {status}: {body}"),
            });
        }

        parse_token_body(&body).map_err(|message| AuthError::Exchange { message })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let token_url = self.config.token_url();
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", self.config.client_id.as_str());
        if let Some(ref secret) = self.config.client_secret {
            params.insert("client_secret", secret.as_str());
        }

        debug!("refreshing OAuth token");
        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Refresh {
                message: format!("token endpoint request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Refresh {
            message: format!("failed to read token response: {e}"),
        })?;
        if !status.is_success() {
            return Err(AuthError::Refresh {
                message: format!("token endpoint returned HTTP {status}: {body}"),
            });
        }

        let mut token = parse_token_body(&body).map_err(|message| AuthError::Refresh { message })?;

        // Some providers don't return a new refresh_token; keep the old one.
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }
}
