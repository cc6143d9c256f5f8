//! Background job: prune old Mercado Libre sync log rows.
//!
//! Runs hourly. The sync path only ever appends; this is the only place rows
//! are deleted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::time;

use crate::store::postgres::PgStore;

/// Spawn the background retention task. Call this once at startup.
/// A retention of 0 days keeps history forever and spawns nothing.
pub fn spawn(db: PgStore, retention_days: u32) {
    if retention_days == 0 {
        tracing::info!("sync log retention disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = prune_once(&db, retention_days, Utc::now()).await {
                tracing::error!("sync log cleanup failed: {}", e);
            }
        }
    });
}

async fn prune_once(db: &PgStore, retention_days: u32, now: DateTime<Utc>) -> anyhow::Result<()> {
    let deleted = db.prune_sync_logs(cutoff(now, retention_days)).await?;
    if deleted > 0 {
        tracing::info!(rows = deleted, retention_days, "pruned old sync log entries");
    }
    Ok(())
}

fn cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - ChronoDuration::days(i64::from(retention_days))
}
