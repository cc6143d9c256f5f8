//! In-process repositories for tests and local dry runs.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{SyncLogRepository, TokenRepository};
use crate::models::sync_log::NewSyncLogEntry;
use crate::models::token::Token;

#[derive(Debug, Default)]
pub struct MemoryTokenRepository {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenRepository {
    pub fn new(initial: Option<Token>) -> Self {
        Self {
            token: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Option<Token> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn load_token(&self) -> anyhow::Result<Option<Token>> {
        Ok(self.current())
    }

    async fn save_token(&self, token: &Token) -> anyhow::Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySyncLog {
    entries: Mutex<Vec<NewSyncLogEntry>>,
    fail_writes: bool,
}

impl MemorySyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails.
    pub fn failing() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail_writes: true,
        }
    }

    pub fn entries(&self) -> Vec<NewSyncLogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SyncLogRepository for MemorySyncLog {
    async fn insert_sync_log(&self, entry: &NewSyncLogEntry) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("sync log unavailable");
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
