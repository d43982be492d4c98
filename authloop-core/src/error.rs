//! Error types for the authloop core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering listener setup, the interactive authorization flow, and token
//! refresh. Storage failures never appear here: the store contract logs and
//! swallows them (see `store`).

use std::path::PathBuf;

/// Top-level error type for the authloop core library.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid redirect URI '{uri}': {reason}")]
    InvalidRedirectUri { uri: String, reason: String },

    #[error(
        "HTTPS redirect requires TLS materials: tried certificate {cert} and key {key}; \
         pass explicit paths or generate dev certs (e.g. with mkcert) at those locations"
    )]
    TlsMaterialsMissing { cert: PathBuf, key: PathBuf },

    #[error("failed to load TLS materials: {message}")]
    Tls { message: String },

    #[error("failed to bind callback listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {waited_secs}s waiting for the OAuth callback on {addr}")]
    CallbackTimeout { waited_secs: u64, addr: String },

    #[error("callback listener stopped before a redirect arrived")]
    ListenerClosed,

    #[error("authorization code exchange failed: {message}")]
    Exchange { message: String },

    #[error("token refresh failed: {message}")]
    Refresh { message: String },

    #[error("state parameter in the callback did not match the authorization request")]
    StateMismatch,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from loading and validating provider configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;
