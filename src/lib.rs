//! Mercado Libre product sync for the supplements CRM.
//!
//! The binary in `main.rs` wires these modules together; integration tests in
//! `tests/` use them directly.

use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod meli;
pub mod models;
pub mod retry;
pub mod store;

use cache::KvStore;
use clock::Clock;
use meli::monitor::MeliMonitor;
use meli::{MarketplaceApi, RateLimitGate, SyncLog, SyncWorkflow, TokenStore};
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub sync: SyncWorkflow,
    pub config: config::Config,
}

impl AppState {
    /// Wire the sync workflow on top of Postgres, the given KV store and marketplace client.
    pub fn new(
        config: config::Config,
        db: PgStore,
        kv: Arc<dyn KvStore>,
        api: Arc<dyn MarketplaceApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let repo = Arc::new(db.clone());
        let monitor = MeliMonitor::new(kv.clone(), clock.clone());
        let tokens = Arc::new(
            TokenStore::new(
                repo.clone(),
                api.clone(),
                clock.clone(),
                config.meli.refresh_token.clone(),
            )
            .with_monitor(monitor.clone()),
        );
        let sync = SyncWorkflow::new(
            RateLimitGate::new(kv.clone(), clock.clone()),
            tokens,
            api,
            SyncLog::new(repo, clock.clone()),
            monitor,
            config.retry.clone(),
            clock,
        );

        Self { db, sync, config }
    }
}
