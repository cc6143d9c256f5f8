use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::monitor::MeliMonitor;
use crate::clock::Clock;
use crate::errors::{AuthRefreshError, MeliError};
use crate::meli::client::MarketplaceApi;
use crate::models::token::{Token, TokenGrant};
use crate::store::TokenRepository;

/// Owns the single marketplace token.
///
/// Reads are served from memory while the token is valid. Refreshes go through
/// `refresh_lock`, and every waiter re-checks after acquiring it, so a burst of
/// callers that all see an expired token triggers exactly one remote refresh.
pub struct TokenStore {
    repo: Arc<dyn TokenRepository>,
    api: Arc<dyn MarketplaceApi>,
    clock: Arc<dyn Clock>,
    bootstrap_refresh: Option<String>,
    monitor: Option<MeliMonitor>,
    cached: RwLock<Option<Token>>,
    refresh_lock: Mutex<()>,
}

const TOKEN_ENDPOINT: &str = "oauth.token";

impl TokenStore {
    pub fn new(
        repo: Arc<dyn TokenRepository>,
        api: Arc<dyn MarketplaceApi>,
        clock: Arc<dyn Clock>,
        bootstrap_refresh: Option<String>,
    ) -> Self {
        Self {
            repo,
            api,
            clock,
            bootstrap_refresh: bootstrap_refresh.filter(|t| !t.is_empty()),
            monitor: None,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Record token endpoint calls in the API metrics.
    pub fn with_monitor(mut self, monitor: MeliMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Return a token that is valid now, refreshing it first if needed.
    pub async fn get_valid_token(&self) -> Result<Token, AuthRefreshError> {
        if let Some(token) = self.cached_valid() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // another caller may have refreshed while we waited
        if let Some(token) = self.cached_valid() {
            debug!("token refreshed by a concurrent caller");
            return Ok(token);
        }

        let stored = self.repo.load_token().await?;
        if let Some(token) = &stored {
            if token.is_valid_at(self.clock.now()) {
                self.set_cached(token.clone());
                return Ok(token.clone());
            }
        }

        let credential = self.refresh_credential(stored.as_ref())?;
        self.refresh_locked(&credential).await
    }

    /// Refresh unconditionally, regardless of the current expiry.
    pub async fn force_refresh(&self) -> Result<Token, AuthRefreshError> {
        let _guard = self.refresh_lock.lock().await;
        let stored = self.repo.load_token().await?;
        let credential = self.refresh_credential(stored.as_ref())?;
        self.refresh_locked(&credential).await
    }

    /// Exchange an OAuth authorization code and store the resulting token.
    pub async fn authorize_with_code(&self, code: &str) -> Result<Token, AuthRefreshError> {
        let _guard = self.refresh_lock.lock().await;
        let issued_at = self.clock.now();
        let grant = self
            .observed(self.api.exchange_code(code))
            .await
            .map_err(into_auth_error)?;
        let previous = self.bootstrap_refresh.clone().unwrap_or_default();
        self.persist(grant, issued_at, &previous).await
    }

    /// The current token without refreshing, valid or not.
    pub async fn current(&self) -> anyhow::Result<Option<Token>> {
        if let Some(token) = self.read_cached() {
            return Ok(Some(token));
        }
        self.repo.load_token().await
    }

    fn refresh_credential(&self, stored: Option<&Token>) -> Result<String, AuthRefreshError> {
        stored
            .map(|t| t.refresh_token.clone())
            .filter(|t| !t.is_empty())
            .or_else(|| self.bootstrap_refresh.clone())
            .ok_or(AuthRefreshError::MissingCredential)
    }

    /// Caller must hold `refresh_lock`.
    async fn refresh_locked(&self, refresh_token: &str) -> Result<Token, AuthRefreshError> {
        info!("refreshing marketplace access token");
        let issued_at = self.clock.now();
        let grant = self
            .observed(self.api.refresh_token(refresh_token))
            .await
            .map_err(into_auth_error)?;
        self.persist(grant, issued_at, refresh_token).await
    }

    /// Nothing is written until the grant has been fully received, so a caller
    /// dropped mid-refresh leaves the previous token in place.
    async fn persist(
        &self,
        grant: TokenGrant,
        issued_at: chrono::DateTime<chrono::Utc>,
        previous_refresh: &str,
    ) -> Result<Token, AuthRefreshError> {
        let expires_in = grant.expires_in;
        let token = Token::from_grant(grant, issued_at, previous_refresh)
            .ok_or(AuthRefreshError::InvalidGrant(expires_in))?;
        self.repo.save_token(&token).await?;
        self.set_cached(token.clone());
        info!(expires_at = %token.expires_at, "marketplace token stored");
        Ok(token)
    }

    async fn observed<F>(&self, call: F) -> Result<TokenGrant, MeliError>
    where
        F: std::future::Future<Output = Result<TokenGrant, MeliError>>,
    {
        let started = std::time::Instant::now();
        let result = call.await;
        if let Some(monitor) = &self.monitor {
            monitor
                .log_api_call(TOKEN_ENDPOINT, result.is_ok(), started.elapsed())
                .await;
        }
        result
    }

    fn cached_valid(&self) -> Option<Token> {
        let now = self.clock.now();
        self.read_cached().filter(|t| t.is_valid_at(now))
    }

    fn read_cached(&self) -> Option<Token> {
        match self.cached.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("token cache lock poisoned");
                poisoned.into_inner().clone()
            }
        }
    }

    fn set_cached(&self, token: Token) {
        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token);
    }
}

fn into_auth_error(err: MeliError) -> AuthRefreshError {
    match err {
        MeliError::Rejected { status, body } => AuthRefreshError::Rejected { status, body },
        other => AuthRefreshError::Remote(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryTokenRepository;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Counts refreshes; optionally fails them.
    struct FakeApi {
        refreshes: AtomicU32,
        reject: bool,
    }

    impl FakeApi {
        fn new(reject: bool) -> Self {
            Self {
                refreshes: AtomicU32::new(0),
                reject,
            }
        }
    }

    #[async_trait]
    impl MarketplaceApi for FakeApi {
        async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, MeliError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if self.reject {
                return Err(MeliError::Rejected {
                    status: 400,
                    body: r#"{"error":"invalid_grant"}"#.into(),
                });
            }
            Ok(TokenGrant {
                access_token: format!("APP_USR-{n}"),
                refresh_token: Some(format!("{refresh_token}+")),
                expires_in: 3600,
                user_id: None,
            })
        }

        async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MeliError> {
            Ok(TokenGrant {
                access_token: format!("APP_USR-{code}"),
                refresh_token: Some("TG-fresh".into()),
                expires_in: 3600,
                user_id: Some(1),
            })
        }

        async fn update_item(&self, _: &str, _: &str, _: &Value) -> Result<Value, MeliError> {
            unreachable!("token store never updates items")
        }
    }

    fn expired_token(clock: &ManualClock) -> Token {
        Token {
            access_token: "APP_USR-old".into(),
            refresh_token: "TG-1".into(),
            expires_at: clock.now() - chrono::Duration::seconds(1),
        }
    }

    fn store(
        clock: Arc<ManualClock>,
        repo: Arc<MemoryTokenRepository>,
        api: Arc<FakeApi>,
        bootstrap: Option<&str>,
    ) -> TokenStore {
        TokenStore::new(repo, api, clock, bootstrap.map(String::from))
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let clock = Arc::new(ManualClock::default());
        let token = Token {
            expires_at: clock.now() + chrono::Duration::minutes(5),
            ..expired_token(&clock)
        };
        let repo = Arc::new(MemoryTokenRepository::new(Some(token.clone())));
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock, repo, api.clone(), None);

        assert_eq!(store.get_valid_token().await.unwrap(), token);
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let clock = Arc::new(ManualClock::default());
        let repo = Arc::new(MemoryTokenRepository::new(Some(expired_token(&clock))));
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock.clone(), repo.clone(), api.clone(), None);

        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "APP_USR-1");
        assert_eq!(token.refresh_token, "TG-1+");
        assert_eq!(token.expires_at, clock.now() + chrono::Duration::seconds(3600));
        assert_eq!(repo.current(), Some(token));

        // expires again after an hour
        clock.advance(Duration::from_secs(3600));
        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "APP_USR-2");
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let clock = Arc::new(ManualClock::default());
        let repo = Arc::new(MemoryTokenRepository::new(Some(expired_token(&clock))));
        let api = Arc::new(FakeApi::new(false));
        let store = Arc::new(store(clock, repo, api.clone(), None));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_valid_token().await })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            let token = handle.unwrap().unwrap();
            assert_eq!(token.access_token, "APP_USR-1");
        }
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bootstrap_refresh_token_used_when_nothing_stored() {
        let clock = Arc::new(ManualClock::default());
        let repo = Arc::new(MemoryTokenRepository::default());
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock, repo.clone(), api, Some("TG-env"));

        let token = store.get_valid_token().await.unwrap();
        assert_eq!(token.refresh_token, "TG-env+");
        assert!(repo.current().is_some());
    }

    #[tokio::test]
    async fn missing_credential_fails_without_remote_call() {
        let clock = Arc::new(ManualClock::default());
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock, Arc::new(MemoryTokenRepository::default()), api.clone(), None);

        let err = store.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthRefreshError::MissingCredential));
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_keeps_old_token() {
        let clock = Arc::new(ManualClock::default());
        let old = expired_token(&clock);
        let repo = Arc::new(MemoryTokenRepository::new(Some(old.clone())));
        let api = Arc::new(FakeApi::new(true));
        let store = store(clock, repo.clone(), api, None);

        let err = store.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthRefreshError::Rejected { status: 400, .. }));
        assert_eq!(repo.current(), Some(old));
    }

    #[tokio::test]
    async fn authorization_code_exchange_stores_token() {
        let clock = Arc::new(ManualClock::default());
        let repo = Arc::new(MemoryTokenRepository::default());
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock, repo.clone(), api.clone(), None);

        let token = store.authorize_with_code("TG-code").await.unwrap();
        assert_eq!(token.access_token, "APP_USR-TG-code");
        assert_eq!(token.refresh_token, "TG-fresh");
        assert_eq!(store.current().await.unwrap(), Some(token));
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn force_refresh_ignores_expiry() {
        let clock = Arc::new(ManualClock::default());
        let valid = Token {
            expires_at: clock.now() + chrono::Duration::hours(1),
            ..expired_token(&clock)
        };
        let repo = Arc::new(MemoryTokenRepository::new(Some(valid)));
        let api = Arc::new(FakeApi::new(false));
        let store = store(clock, repo, api.clone(), None);

        let token = store.force_refresh().await.unwrap();
        assert_eq!(token.access_token, "APP_USR-1");
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_calls_are_counted_in_metrics() {
        use crate::cache::{KvStore, MemoryStore};

        let clock = Arc::new(ManualClock::default());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new(clock.clone()));
        let monitor = MeliMonitor::new(kv, clock.clone());

        let repo = Arc::new(MemoryTokenRepository::new(Some(expired_token(&clock))));
        let store = store(clock.clone(), repo, Arc::new(FakeApi::new(false)), None)
            .with_monitor(monitor.clone());
        store.get_valid_token().await.unwrap();
        store.authorize_with_code("TG-code").await.unwrap();

        let rejecting = store_with_rejecting_api(&clock).with_monitor(monitor.clone());
        assert!(rejecting.get_valid_token().await.is_err());

        let metrics = monitor.daily_metrics().await.unwrap();
        let stats = &metrics.endpoints[TOKEN_ENDPOINT];
        assert_eq!(stats.calls, 3);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn unusable_grant_lifetime_is_an_auth_error() {
        struct EndlessGrant;

        #[async_trait]
        impl MarketplaceApi for EndlessGrant {
            async fn refresh_token(&self, _: &str) -> Result<TokenGrant, MeliError> {
                Ok(TokenGrant {
                    access_token: "APP_USR-forever".into(),
                    refresh_token: None,
                    expires_in: i64::MAX,
                    user_id: None,
                })
            }

            async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MeliError> {
                self.refresh_token(code).await
            }

            async fn update_item(&self, _: &str, _: &str, _: &Value) -> Result<Value, MeliError> {
                unreachable!("token store never updates items")
            }
        }

        let clock = Arc::new(ManualClock::default());
        let old = expired_token(&clock);
        let repo = Arc::new(MemoryTokenRepository::new(Some(old.clone())));
        let store = TokenStore::new(repo.clone(), Arc::new(EndlessGrant), clock, None);

        let err = store.get_valid_token().await.unwrap_err();
        assert!(matches!(err, AuthRefreshError::InvalidGrant(i64::MAX)));
        assert_eq!(repo.current(), Some(old));
    }

    fn store_with_rejecting_api(clock: &Arc<ManualClock>) -> TokenStore {
        let repo = Arc::new(MemoryTokenRepository::new(Some(expired_token(clock))));
        store(clock.clone(), repo, Arc::new(FakeApi::new(true)), None)
    }
}
