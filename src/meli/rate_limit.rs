use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::KvStore;
use crate::clock::Clock;

pub const RATE_LIMIT_KEY: &str = "meli_rate_limit";

/// Cooldown applied when the remote does not say how long to back off.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Longest cooldown honoured, whatever the remote asks for.
pub const MAX_COOLDOWN_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitFlag {
    pub active: bool,
    pub until: DateTime<Utc>,
}

/// Shared "remote is throttling us" flag.
///
/// The flag expires on its own; there is no clear operation. Concurrent writers
/// race with last-writer-wins semantics.
#[derive(Clone)]
pub struct RateLimitGate {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimitGate {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn is_limited(&self) -> bool {
        self.flag().await.is_some()
    }

    /// The active flag, if any. A store failure reads as "not limited".
    pub async fn flag(&self) -> Option<RateLimitFlag> {
        match self.store.get::<RateLimitFlag>(RATE_LIMIT_KEY).await {
            Ok(Some(flag)) if flag.active && self.clock.now() < flag.until => Some(flag),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("failed to read rate-limit flag: {}", e);
                None
            }
        }
    }

    pub async fn set_limited(&self, cooldown_secs: u64) {
        let cooldown_secs = bounded_cooldown(cooldown_secs);
        let until = self.clock.now() + chrono::Duration::seconds(cooldown_secs as i64);
        let flag = RateLimitFlag {
            active: true,
            until,
        };

        if let Err(e) = self.store.set(RATE_LIMIT_KEY, &flag, cooldown_secs).await {
            tracing::error!("failed to set rate-limit flag: {}", e);
            return;
        }
        tracing::warn!(
            rate_limit = true,
            cooldown_secs,
            until = %until,
            "marketplace rate limit engaged"
        );
    }

    /// Set the gate from a `Retry-After` value, falling back to the default cooldown.
    pub async fn set_from_retry_after(&self, retry_after: Option<u64>) -> u64 {
        let cooldown = bounded_cooldown(retry_after.unwrap_or(0));
        self.set_limited(cooldown).await;
        cooldown
    }
}

fn bounded_cooldown(secs: u64) -> u64 {
    match secs {
        0 => DEFAULT_COOLDOWN_SECS,
        s => s.min(MAX_COOLDOWN_SECS),
    }
}
