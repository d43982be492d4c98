//! Token lifecycle: cache, refresh, and the interactive fallback.
//!
//! `TokenManager` decides whether the token on hand is still usable and
//! runs at most one refresh per lookup. `Authenticator` sits on top and
//! adds the browser round trip for when no usable token exists.

use crate::client::{BrowserOpener, OAuthClient};
use crate::error::Result;
use crate::listener::{ListenerConfig, wait_for_callback};
use crate::store::TokenStore;
use crate::token::Token;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keeps one token in memory, mirrors it to a [`TokenStore`], and refreshes
/// it when it goes stale.
pub struct TokenManager {
    store: Box<dyn TokenStore>,
    current: Option<Token>,
}

impl TokenManager {
    pub fn new(store: Box<dyn TokenStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Return a usable token without user interaction, or `None`.
    ///
    /// Checks memory first, then adopts whatever the store holds. A token
    /// that is still valid is returned as-is and nothing is written back.
    /// A stale token with a refresh token gets one refresh attempt. Refresh
    /// failure is logged and reported as `None`, never as an error, so
    /// callers can fall back to the interactive flow.
    pub async fn get_or_refresh(&mut self, client: &dyn OAuthClient) -> Option<Token> {
        if self.current.is_none() {
            if let Some(stored) = self.store.get_token() {
                debug!("adopted token from store");
                self.current = Some(stored);
            }
        }

        let candidate = self.current.clone()?;
        if candidate.is_valid() {
            debug!("access token still valid, reusing it");
            return Some(candidate);
        }

        let refresh_token = candidate.refresh_token?;
        self.run_refresh(client, &refresh_token).await
    }

    /// Run a refresh attempt even if the current token is still valid.
    ///
    /// `None` means there was nothing to refresh or the provider turned
    /// the refresh down; the previous token is kept either way.
    pub async fn force_refresh(&mut self, client: &dyn OAuthClient) -> Option<Token> {
        if self.current.is_none() {
            self.current = self.store.get_token();
        }
        let refresh_token = self.current.as_ref()?.refresh_token.clone()?;
        self.run_refresh(client, &refresh_token).await
    }

    async fn run_refresh(&mut self, client: &dyn OAuthClient, refresh_token: &str) -> Option<Token> {
        info!("refreshing access token");
        match client.refresh(refresh_token).await {
            Ok(token) => {
                self.adopt(token.clone());
                Some(token)
            }
            Err(e) => {
                info!("token refresh failed: {e}");
                None
            }
        }
    }

    /// Take `token` as the current one and persist it.
    pub fn adopt(&mut self, token: Token) {
        self.store.save_token(&token);
        self.current = Some(token);
    }

    /// Drop the current token from memory and the store.
    pub fn forget(&mut self) {
        self.current = None;
        self.store.delete_token();
    }
}

/// The full credential flow: reuse, refresh, or walk the user through
/// browser authorization.
pub struct Authenticator {
    client: Arc<dyn OAuthClient>,
    browser: Box<dyn BrowserOpener>,
    manager: TokenManager,
    listener: ListenerConfig,
}

impl Authenticator {
    pub fn new(
        client: Arc<dyn OAuthClient>,
        browser: Box<dyn BrowserOpener>,
        store: Box<dyn TokenStore>,
        listener: ListenerConfig,
    ) -> Self {
        Self {
            client,
            browser,
            manager: TokenManager::new(store),
            listener,
        }
    }

    /// Non-interactive lookup, see [`TokenManager::get_or_refresh`].
    pub async fn get_or_refresh(&mut self) -> Option<Token> {
        self.manager.get_or_refresh(self.client.as_ref()).await
    }

    /// Return a valid token, starting the interactive flow if reuse and
    /// refresh both come up empty.
    pub async fn get_token(&mut self) -> Result<Token> {
        if let Some(token) = self.get_or_refresh().await {
            return Ok(token);
        }
        self.interactive_authorize().await
    }

    /// Run the browser authorization flow from scratch.
    ///
    /// The browser hop is fire-and-forget: if no browser can be opened the
    /// URL is logged for the user to visit by hand and the callback wait
    /// proceeds regardless.
    pub async fn interactive_authorize(&mut self) -> Result<Token> {
        let auth_url = self.client.authorization_url()?;
        info!("opening browser for OAuth authorization at {auth_url}");
        if let Err(e) = self.browser.open(&auth_url) {
            warn!("could not open a browser ({e}); visit this URL to continue: {auth_url}");
        }

        let callback_url = wait_for_callback(&self.listener).await?;
        let token = self.client.exchange_code(&callback_url).await?;
        info!("authorization complete, token stored");
        self.manager.adopt(token.clone());
        Ok(token)
    }

    /// See [`TokenManager::force_refresh`].
    pub async fn force_refresh(&mut self) -> Option<Token> {
        self.manager.force_refresh(self.client.as_ref()).await
    }

    /// Forget the current token in memory and on disk.
    pub fn logout(&mut self) {
        self.manager.forget();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::store::MemoryTokenStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn make_token(access: &str, refresh: Option<&str>, expires_at: Option<i64>) -> Token {
        Token {
            access_token: access.to_string(),
            refresh_token: refresh.map(String::from),
            expires_at,
            extra: serde_json::Map::new(),
        }
    }

    struct MockClient {
        authorize_calls: AtomicUsize,
        exchange_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        fail_refresh: bool,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                authorize_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                fail_refresh: false,
            })
        }

        fn failing_refresh() -> Arc<Self> {
            Arc::new(Self {
                authorize_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                fail_refresh: true,
            })
        }
    }

    #[async_trait]
    impl OAuthClient for MockClient {
        fn authorization_url(&self) -> Result<String> {
            self.authorize_calls.fetch_add(1, Ordering::SeqCst);
            Ok("https://provider.test/oauth/authorize?client_id=mock".to_string())
        }

        async fn exchange_code(&self, callback_url: &str) -> Result<Token> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            let url = url::Url::parse(callback_url).unwrap();
            let code = url
                .query_pairs()
                .find(|(k, _)| k == "code")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            Ok(make_token(
                &format!("at-from-{code}"),
                Some("rt-new"),
                Some(Utc::now().timestamp() + 3600),
            ))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Token> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(AuthError::Refresh {
                    message: "provider said invalid_grant".to_string(),
                });
            }
            Ok(make_token(
                "at-refreshed",
                Some(refresh_token),
                Some(Utc::now().timestamp() + 3600),
            ))
        }
    }

    struct RecordingBrowser {
        opened: Arc<Mutex<Vec<String>>>,
    }

    impl BrowserOpener for RecordingBrowser {
        fn open(&self, url: &str) -> std::io::Result<()> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct FailingBrowser;

    impl BrowserOpener for FailingBrowser {
        fn open(&self, _url: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no browser installed",
            ))
        }
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn get_when_up(url: &str) -> reqwest::Response {
        for _ in 0..50 {
            if let Ok(resp) = reqwest::get(url).await {
                return resp;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server at {url} never came up");
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_without_refresh() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-fresh",
            Some("rt-1"),
            Some(Utc::now().timestamp() + 3600),
        ));
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(store.clone()));

        let token = manager.get_or_refresh(client.as_ref()).await.unwrap();
        assert_eq!(token.access_token, "at-fresh");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
        // Reuse must not write the token back.
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_token_without_expiry_is_trusted() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token("at-forever", Some("rt-1"), None));
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(store.clone()));

        let token = manager.get_or_refresh(client.as_ref()).await.unwrap();
        assert_eq!(token.access_token, "at-forever");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_and_persisted() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-stale",
            Some("rt-1"),
            Some(Utc::now().timestamp() - 60),
        ));
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(store.clone()));

        let token = manager.get_or_refresh(client.as_ref()).await.unwrap();
        assert_eq!(token.access_token, "at-refreshed");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_token().unwrap().access_token, "at-refreshed");
        assert_eq!(store.save_count(), 2);

        // The refreshed token is now cached; a second lookup reuses it.
        let again = manager.get_or_refresh(client.as_ref()).await.unwrap();
        assert_eq!(again.access_token, "at-refreshed");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_yields_none() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-stale",
            Some("rt-dead"),
            Some(Utc::now().timestamp() - 60),
        ));
        let client = MockClient::failing_refresh();
        let mut manager = TokenManager::new(Box::new(store.clone()));

        assert!(manager.get_or_refresh(client.as_ref()).await.is_none());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        // The stale token stays in the store untouched.
        assert_eq!(store.get_token().unwrap().access_token, "at-stale");
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_token_without_refresh_token_yields_none() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-stale",
            None,
            Some(Utc::now().timestamp() - 60),
        ));
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(store));

        assert!(manager.get_or_refresh(client.as_ref()).await.is_none());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_stored_token_yields_none_without_client_calls() {
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(MemoryTokenStore::default()));

        assert!(manager.get_or_refresh(client.as_ref()).await.is_none());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_validity() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-fresh",
            Some("rt-1"),
            Some(Utc::now().timestamp() + 3600),
        ));
        let client = MockClient::new();
        let mut manager = TokenManager::new(Box::new(store.clone()));

        let token = manager.force_refresh(client.as_ref()).await.unwrap();
        assert_eq!(token.access_token, "at-refreshed");
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_token().unwrap().access_token, "at-refreshed");
    }

    #[tokio::test]
    async fn test_get_token_returns_existing_before_going_interactive() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-fresh",
            None,
            Some(Utc::now().timestamp() + 3600),
        ));
        let client = MockClient::new();
        let opened = Arc::new(Mutex::new(Vec::new()));
        // Listener config points at a port nothing will ever bind.
        let mut auth = Authenticator::new(
            client.clone(),
            Box::new(RecordingBrowser {
                opened: opened.clone(),
            }),
            Box::new(store),
            ListenerConfig::new("http://127.0.0.1:1/callback"),
        );

        let token = auth.get_token().await.unwrap();
        assert_eq!(token.access_token, "at-fresh");
        assert_eq!(client.authorize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_token_runs_interactive_flow() {
        let port = free_port();
        let store = MemoryTokenStore::default();
        let client = MockClient::new();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let mut auth = Authenticator::new(
            client.clone(),
            Box::new(RecordingBrowser {
                opened: opened.clone(),
            }),
            Box::new(store.clone()),
            ListenerConfig::new(&format!("http://127.0.0.1:{port}/callback"))
                .with_timeout(Some(Duration::from_secs(5))),
        );

        let flow = tokio::spawn(async move {
            let result = auth.get_token().await;
            (auth, result)
        });

        let response =
            get_when_up(&format!("http://127.0.0.1:{port}/callback?code=abc123&state=s1")).await;
        assert_eq!(response.status(), 200);

        let (mut auth, result) = flow.await.unwrap();
        let token = result.unwrap();
        assert_eq!(token.access_token, "at-from-abc123");
        assert_eq!(
            opened.lock().unwrap().as_slice(),
            ["https://provider.test/oauth/authorize?client_id=mock"]
        );
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.save_count(), 1);

        // The token from the interactive flow is now the cached one.
        let again = auth.get_or_refresh().await.unwrap();
        assert_eq!(again.access_token, "at-from-abc123");
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interactive_flow_survives_browser_failure() {
        let port = free_port();
        let store = MemoryTokenStore::default();
        let client = MockClient::new();
        let mut auth = Authenticator::new(
            client.clone(),
            Box::new(FailingBrowser),
            Box::new(store.clone()),
            ListenerConfig::new(&format!("http://127.0.0.1:{port}/callback"))
                .with_timeout(Some(Duration::from_secs(5))),
        );

        let flow = tokio::spawn(async move { auth.get_token().await });

        get_when_up(&format!("http://127.0.0.1:{port}/callback?code=headless")).await;

        let token = flow.await.unwrap().unwrap();
        assert_eq!(token.access_token, "at-from-headless");
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_token_everywhere() {
        let store = MemoryTokenStore::default();
        store.save_token(&make_token(
            "at-fresh",
            Some("rt-1"),
            Some(Utc::now().timestamp() + 3600),
        ));
        let client = MockClient::new();
        let mut auth = Authenticator::new(
            client.clone(),
            Box::new(FailingBrowser),
            Box::new(store.clone()),
            ListenerConfig::new("http://127.0.0.1:1/callback"),
        );

        assert!(auth.get_or_refresh().await.is_some());
        auth.logout();
        assert!(store.get_token().is_none());
        assert!(auth.get_or_refresh().await.is_none());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }
}
