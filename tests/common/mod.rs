//! Shared harness: a sync workflow wired to in-memory stores, a manual clock and a
//! wiremock stand-in for the marketplace.

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use wiremock::MockServer;

use meli_sync::cache::{KvStore, MemoryStore};
use meli_sync::clock::{Clock, ManualClock};
use meli_sync::config::MeliConfig;
use meli_sync::meli::monitor::MeliMonitor;
use meli_sync::meli::{MeliClient, RateLimitGate, SyncLog, SyncWorkflow, TokenStore};
use meli_sync::models::product::ProductSnapshot;
use meli_sync::models::token::Token;
use meli_sync::retry::RetryPolicy;
use meli_sync::store::memory::{MemorySyncLog, MemoryTokenRepository};
use meli_sync::store::{SyncLogRepository, TokenRepository};

pub struct Harness {
    pub server: MockServer,
    pub clock: Arc<ManualClock>,
    pub kv: Arc<MemoryStore>,
    pub tokens: Arc<MemoryTokenRepository>,
    pub log: Arc<MemorySyncLog>,
    pub workflow: SyncWorkflow,
}

pub struct Options {
    pub bootstrap_refresh: Option<String>,
    pub request_timeout_secs: u64,
    pub failing_log: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bootstrap_refresh: None,
            request_timeout_secs: 5,
            failing_log: false,
        }
    }
}

impl Harness {
    /// Harness with a token that stays valid for the whole test.
    pub async fn with_valid_token() -> Self {
        let h = Self::start(Options::default()).await;
        h.store_token(&h.valid_token()).await;
        h
    }

    pub async fn start(opts: Options) -> Self {
        let server = MockServer::start().await;
        let clock = Arc::new(ManualClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let kv = Arc::new(MemoryStore::new(dyn_clock.clone()));
        let dyn_kv: Arc<dyn KvStore> = kv.clone();
        let tokens = Arc::new(MemoryTokenRepository::default());
        let log = Arc::new(if opts.failing_log {
            MemorySyncLog::failing()
        } else {
            MemorySyncLog::new()
        });
        let log_repo: Arc<dyn SyncLogRepository> = log.clone();

        let api = Arc::new(
            MeliClient::new(&MeliConfig {
                client_id: "app-1".into(),
                client_secret: "s3cret".into(),
                api_base_url: server.uri(),
                request_timeout_secs: opts.request_timeout_secs,
                ..MeliConfig::default()
            })
            .expect("client"),
        );

        let monitor = MeliMonitor::new(dyn_kv.clone(), dyn_clock.clone());
        let token_store = Arc::new(
            TokenStore::new(
                tokens.clone(),
                api.clone(),
                dyn_clock.clone(),
                opts.bootstrap_refresh,
            )
            .with_monitor(monitor.clone()),
        );

        let workflow = SyncWorkflow::new(
            RateLimitGate::new(dyn_kv.clone(), dyn_clock.clone()),
            token_store,
            api,
            SyncLog::new(log_repo, dyn_clock.clone()),
            monitor,
            RetryPolicy::default(),
            dyn_clock,
        );

        Self {
            server,
            clock,
            kv,
            tokens,
            log,
            workflow,
        }
    }

    pub async fn store_token(&self, token: &Token) {
        self.tokens.save_token(token).await.expect("save token");
    }

    pub fn valid_token(&self) -> Token {
        Token {
            access_token: "APP_USR-valid".into(),
            refresh_token: "TG-valid".into(),
            expires_at: self.clock.now() + chrono::Duration::hours(6),
        }
    }

    pub fn expired_token(&self) -> Token {
        Token {
            access_token: "APP_USR-old".into(),
            refresh_token: "TG-old".into(),
            expires_at: self.clock.now() - chrono::Duration::minutes(1),
        }
    }

    pub async fn requests_to(&self, path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

pub fn whey_protein() -> ProductSnapshot {
    ProductSnapshot {
        name: "Whey Protein 1kg".into(),
        description: Some("Chocolate flavour".into()),
        price: Decimal::new(4500, 0),
        current_stock: 12,
        category: "supplements".into(),
        images: vec!["https://cdn.example.com/whey.jpg".into()],
        attributes: json!({"brand": "Acme", "flavor": "chocolate"}),
    }
}

pub fn grant_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 21600,
        "user_id": 1234
    })
}
