//! Per-hour call statistics for the marketplace API, kept in the shared KV store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::KvStore;
use crate::clock::Clock;

const METRICS_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointStats {
    pub calls: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HourlyMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_response_time_ms: u64,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DailyMetrics {
    pub total_calls: u64,
    pub total_failures: u64,
    pub avg_response_time_ms: f64,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

#[derive(Clone)]
pub struct MeliMonitor {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

fn hour_key(at: DateTime<Utc>) -> String {
    format!("meli_metrics_{}", at.format("%Y%m%d_%H"))
}

impl MeliMonitor {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Best effort; failures are only logged. Concurrent writers in the same hour
    /// may lose an increment.
    pub async fn log_api_call(&self, endpoint: &str, success: bool, response_time: Duration) {
        if let Err(e) = self.try_log(endpoint, success, response_time).await {
            tracing::warn!(endpoint, "failed to record marketplace metrics: {}", e);
        }
    }

    async fn try_log(
        &self,
        endpoint: &str,
        success: bool,
        response_time: Duration,
    ) -> anyhow::Result<()> {
        let key = hour_key(self.clock.now());
        let mut metrics = self
            .store
            .get::<HourlyMetrics>(&key)
            .await?
            .unwrap_or_default();

        metrics.calls += 1;
        metrics.total_response_time_ms += response_time.as_millis() as u64;
        let stats = metrics.endpoints.entry(endpoint.to_string()).or_default();
        stats.calls += 1;
        if !success {
            metrics.failures += 1;
            stats.failures += 1;
        }

        self.store.set(&key, &metrics, METRICS_TTL_SECS).await
    }

    /// Aggregate every hour bucket of the current UTC day.
    pub async fn daily_metrics(&self) -> anyhow::Result<DailyMetrics> {
        let today = self.clock.now().date_naive();
        let mut daily = DailyMetrics::default();
        let mut total_time_ms = 0u64;

        for hour in 0..24 {
            let Some(at) = today.and_hms_opt(hour, 0, 0) else {
                continue;
            };
            let key = hour_key(at.and_utc());
            let Some(hourly) = self.store.get::<HourlyMetrics>(&key).await? else {
                continue;
            };

            daily.total_calls += hourly.calls;
            daily.total_failures += hourly.failures;
            total_time_ms += hourly.total_response_time_ms;
            for (name, stats) in hourly.endpoints {
                let entry = daily.endpoints.entry(name).or_default();
                entry.calls += stats.calls;
                entry.failures += stats.failures;
            }
        }

        if daily.total_calls > 0 {
            daily.avg_response_time_ms = total_time_ms as f64 / daily.total_calls as f64;
        }
        Ok(daily)
    }
}
