use std::sync::Arc;

use crate::clock::Clock;
use crate::models::sync_log::NewSyncLogEntry;
use crate::store::SyncLogRepository;

/// Audit trail writer for sync attempts.
///
/// A failed write is reported through tracing and otherwise swallowed: the
/// outcome returned to the caller never depends on the log.
#[derive(Clone)]
pub struct SyncLog {
    repo: Arc<dyn SyncLogRepository>,
    clock: Arc<dyn Clock>,
}

impl SyncLog {
    pub fn new(repo: Arc<dyn SyncLogRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn record(
        &self,
        product_id: i64,
        remote_item_id: &str,
        success: bool,
        error_details: Option<String>,
    ) {
        let entry = NewSyncLogEntry {
            product_id,
            remote_item_id: remote_item_id.to_string(),
            success,
            error_details,
            created_at: self.clock.now(),
        };

        match self.repo.insert_sync_log(&entry).await {
            Ok(()) => tracing::debug!(
                product_id,
                item_id = remote_item_id,
                success,
                "sync log recorded"
            ),
            Err(e) => tracing::error!(
                product_id,
                item_id = remote_item_id,
                success,
                "failed to write sync log: {}",
                e
            ),
        }
    }
}
