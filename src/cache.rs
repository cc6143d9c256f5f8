use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Longest TTL either store will apply. Longer requests are clamped.
pub const MAX_TTL_SECS: u64 = 30 * 86_400;

fn bounded_ttl(ttl_secs: u64) -> u64 {
    ttl_secs.clamp(1, MAX_TTL_SECS)
}

/// Shared key-value store with per-key expiry.
///
/// Holds the ephemeral state shared by every in-flight sync (rate-limit flag,
/// API metrics). Passed into components explicitly so tests get isolated instances.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

impl dyn KvStore {
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, json, ttl_secs).await
    }
}

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Two-tier cache: in-memory DashMap (tier 1) backed by Redis (tier 2).
///
/// The local tier honours TTLs: entries are checked on read and evicted lazily.
/// A background sweep can be triggered with `evict_expired()`.
#[derive(Clone)]
pub struct TieredCache {
    local: Arc<DashMap<String, CacheEntry>>,
    redis: ConnectionManager,
}

impl TieredCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
        }
    }

    /// Remove all locally-expired entries. Call this periodically from a
    /// background task to bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }
}

#[async_trait]
impl KvStore for TieredCache {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        // tier 1: in-memory (with TTL check)
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
            // expired, drop the ref before removing
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: redis
        let mut conn = self.redis.clone();
        let Some(v) = conn.get::<_, Option<String>>(key).await? else {
            return Ok(None);
        };

        // Re-use the Redis TTL for the local entry.
        let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(60);
        let ttl = if ttl_secs > 0 {
            Duration::from_secs(ttl_secs as u64)
        } else {
            Duration::from_secs(60)
        };
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: v.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(v))
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()> {
        let ttl_secs = bounded_ttl(ttl_secs);
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.local.remove(key);
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// Process-local store whose expiry follows the injected clock.
pub struct MemoryStore {
    entries: DashMap<String, (String, chrono::DateTime<chrono::Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if now < entry.1 {
                return Ok(Some(entry.0.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: u64) -> anyhow::Result<()> {
        let ttl = chrono::Duration::seconds(bounded_ttl(ttl_secs) as i64);
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
