use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attempted remote update and its final outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSyncLogEntry {
    pub product_id: i64,
    pub remote_item_id: String,
    pub success: bool,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncLogRow {
    pub id: i64,
    pub product_id: i64,
    pub remote_item_id: String,
    pub success: bool,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Success/failure counts over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncLogSummary {
    pub succeeded: i64,
    pub failed: i64,
}
