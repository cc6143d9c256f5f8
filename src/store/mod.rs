use async_trait::async_trait;

use crate::models::sync_log::NewSyncLogEntry;
use crate::models::token::Token;

pub mod memory;
pub mod postgres;

/// Persistence for the single active marketplace token.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn load_token(&self) -> anyhow::Result<Option<Token>>;

    /// Replace the stored token. There is never more than one.
    async fn save_token(&self, token: &Token) -> anyhow::Result<()>;
}

/// Append-only sink for sync attempts.
#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    async fn insert_sync_log(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()>;
}
