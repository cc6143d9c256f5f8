//! Mercado Libre integration: token lifecycle, throttling, audit trail and the
//! product sync workflow that ties them together.

pub mod client;
pub mod monitor;
pub mod payload;
pub mod rate_limit;
pub mod sync_log;
pub mod token_store;
pub mod workflow;

pub use client::{MarketplaceApi, MeliClient};
pub use rate_limit::RateLimitGate;
pub use sync_log::SyncLog;
pub use token_store::TokenStore;
pub use workflow::{SyncResult, SyncWorkflow};
