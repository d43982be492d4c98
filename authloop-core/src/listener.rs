//! One-shot local callback listener for the authorization-code redirect.
//!
//! `wait_for_callback` binds the address named by the redirect URI, serves
//! until exactly one request under the expected path arrives, and returns
//! that request's full URL (query string included). Everything else gets a
//! 404 and the wait continues. The listener is torn down on every exit
//! path, so the port is free again by the time the call returns.
//!
//! HTTPS redirect URIs are served with real TLS or not at all: materials
//! come from explicit paths or the conventional `certs/localhost.pem` +
//! `certs/localhost-key.pem` pair, and missing files are a configuration
//! error, never a silent downgrade to plaintext.

use crate::error::{AuthError, Result};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Default total wait for the interactive redirect.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 180;

const DEFAULT_CALLBACK_HOST: &str = "127.0.0.1";

/// Conventional TLS material locations, relative to the working directory.
const TLS_CERT_DIR: &str = "certs";
const TLS_CERT_FILE: &str = "localhost.pem";
const TLS_KEY_FILE: &str = "localhost-key.pem";

const CONFIRMATION_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication complete</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h3>Authentication complete.</h3>
<p>You may close this window and return to the application.</p>
</body>
</html>"#;

/// Where and how long to listen for the redirect.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Redirect URI registered with the provider, `http` or `https`.
    pub redirect_uri: String,
    /// Total wait; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// PEM certificate for `https` redirects; conventional path when unset.
    pub certfile: Option<PathBuf>,
    /// PEM private key for `https` redirects; conventional path when unset.
    pub keyfile: Option<PathBuf>,
}

impl ListenerConfig {
    /// Config for the given redirect URI with the default timeout.
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            timeout: Some(Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS)),
            certfile: None,
            keyfile: None,
        }
    }

    /// Override the total wait; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use explicit TLS materials instead of the conventional paths.
    pub fn with_tls_materials(
        mut self,
        certfile: impl Into<PathBuf>,
        keyfile: impl Into<PathBuf>,
    ) -> Self {
        self.certfile = Some(certfile.into());
        self.keyfile = Some(keyfile.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackScheme {
    Http,
    Https,
}

/// The redirect URI broken into the pieces the listener needs.
#[derive(Debug)]
struct CallbackEndpoint {
    scheme: CallbackScheme,
    host: String,
    port: u16,
    path: String,
}

impl CallbackEndpoint {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn base_url(&self) -> String {
        let scheme = match self.scheme {
            CallbackScheme::Http => "http",
            CallbackScheme::Https => "https",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

fn parse_redirect_uri(redirect_uri: &str) -> Result<CallbackEndpoint> {
    let url = url::Url::parse(redirect_uri).map_err(|e| AuthError::InvalidRedirectUri {
        uri: redirect_uri.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = match url.scheme() {
        "http" => CallbackScheme::Http,
        "https" => CallbackScheme::Https,
        other => {
            return Err(AuthError::InvalidRedirectUri {
                uri: redirect_uri.to_string(),
                reason: format!("unsupported scheme '{other}', expected http or https"),
            });
        }
    };

    let host = url
        .host_str()
        .unwrap_or(DEFAULT_CALLBACK_HOST)
        .to_string();
    let port = url.port().unwrap_or(match scheme {
        CallbackScheme::Http => 80,
        CallbackScheme::Https => 443,
    });
    let path = if url.path().is_empty() {
        "/".to_string()
    } else {
        url.path().to_string()
    };

    Ok(CallbackEndpoint {
        scheme,
        host,
        port,
        path,
    })
}

/// Resolve the TLS material paths for an `https` redirect: explicit config
/// first, then the conventional `certs/` pair. Missing files fail here,
/// naming what was tried.
fn resolve_tls_materials(config: &ListenerConfig) -> Result<(PathBuf, PathBuf)> {
    let cert = config
        .certfile
        .clone()
        .unwrap_or_else(|| Path::new(TLS_CERT_DIR).join(TLS_CERT_FILE));
    let key = config
        .keyfile
        .clone()
        .unwrap_or_else(|| Path::new(TLS_CERT_DIR).join(TLS_KEY_FILE));
    if !cert.exists() || !key.exists() {
        return Err(AuthError::TlsMaterialsMissing { cert, key });
    }
    Ok((cert, key))
}

/// Build the axum router serving the one-shot callback.
///
/// The sender is taken by the first request under the expected path; any
/// later request finds the slot empty and the confirmation page is all it
/// gets. Requests outside the expected path are answered 404 and do not
/// complete the wait.
fn build_callback_router(
    expected_path: String,
    base_url: String,
    tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<String>>>>,
) -> axum::Router {
    axum::Router::new().fallback(move |uri: Uri| {
        let tx = tx.clone();
        let expected_path = expected_path.clone();
        let base_url = base_url.clone();
        async move {
            if !uri.path().starts_with(&expected_path) {
                return StatusCode::NOT_FOUND.into_response();
            }

            let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            let callback_url = format!("{base_url}{path_and_query}");
            if let Some(sender) = tx.lock().await.take() {
                let _ = sender.send(callback_url);
            }

            Html(CONFIRMATION_PAGE).into_response()
        }
    })
}

/// Wait for a single OAuth redirect at the configured address.
///
/// Binds before waiting (bind failures surface immediately), serves on a
/// spawned task, and resolves with the full callback URL once a request
/// under the expected path arrives. With a configured timeout the wait is
/// bounded; with `timeout: None` it blocks until the redirect shows up.
/// The bound socket is released before this function returns, success or
/// not.
pub async fn wait_for_callback(config: &ListenerConfig) -> Result<String> {
    let endpoint = parse_redirect_uri(&config.redirect_uri)?;
    let addr = endpoint.addr();

    let (tx, rx) = oneshot::channel::<String>();
    let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));
    let app = build_callback_router(endpoint.path.clone(), endpoint.base_url(), tx);

    let server = match endpoint.scheme {
        CallbackScheme::Https => {
            let listener =
                std::net::TcpListener::bind(&addr).map_err(|source| AuthError::Bind {
                    addr: addr.clone(),
                    source,
                })?;
            listener
                .set_nonblocking(true)
                .map_err(|source| AuthError::Bind {
                    addr: addr.clone(),
                    source,
                })?;

            let (cert, key) = resolve_tls_materials(config)?;

            // Ensure the rustls CryptoProvider is installed (idempotent).
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|e| AuthError::Tls {
                    message: format!("{} / {}: {}", cert.display(), key.display(), e),
                })?;

            debug!(addr = %addr, "HTTPS callback listener bound");
            tokio::spawn(async move {
                let _ = axum_server::from_tcp_rustls(listener, tls_config)
                    .serve(app.into_make_service())
                    .await;
            })
        }
        CallbackScheme::Http => {
            let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|source| {
                AuthError::Bind {
                    addr: addr.clone(),
                    source,
                }
            })?;

            debug!(addr = %addr, "HTTP callback listener bound");
            tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            })
        }
    };

    let outcome = match config.timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(Ok(callback_url)) => Ok(callback_url),
            Ok(Err(_)) => Err(AuthError::ListenerClosed),
            Err(_) => Err(AuthError::CallbackTimeout {
                waited_secs: limit.as_secs(),
                addr: addr.clone(),
            }),
        },
        None => rx.await.map_err(|_| AuthError::ListenerClosed),
    };

    if outcome.is_ok() {
        // Let the confirmation page reach the browser before teardown.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    server.abort();
    let _ = server.await;
    debug!(addr = %addr, received = outcome.is_ok(), "callback listener closed");

    outcome
}
