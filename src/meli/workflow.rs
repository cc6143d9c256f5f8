use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use super::client::MarketplaceApi;
use super::monitor::MeliMonitor;
use super::payload::build_item_payload;
use super::rate_limit::RateLimitGate;
use super::sync_log::SyncLog;
use super::token_store::TokenStore;
use crate::clock::Clock;
use crate::errors::MeliError;
use crate::models::product::ProductSnapshot;
use crate::retry::{RetryPolicy, Retryable};

const ITEM_UPDATE_ENDPOINT: &str = "items.update";

/// Outcome of one `sync_product` call. Every variant other than `Success` means
/// "local change kept, remote copy stale".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncResult {
    Success { remote: Value },
    RemoteRejected {
        #[serde(rename = "http_status")]
        status: u16,
        details: String,
    },
    RateLimited,
    AuthFailed { reason: String },
    TransientFailureExhausted { attempts: u32, last_error: String },
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success { .. })
    }

    /// Human-readable warning for a non-successful sync.
    pub fn warning(&self) -> Option<String> {
        match self {
            SyncResult::Success { .. } => None,
            SyncResult::RemoteRejected { status, .. } => Some(format!(
                "Mercado Libre rejected the update ({status}); listing not updated"
            )),
            SyncResult::RateLimited => {
                Some("Mercado Libre is rate limiting requests; sync pending".to_string())
            }
            SyncResult::AuthFailed { .. } => {
                Some("Mercado Libre authorization failed; sync pending".to_string())
            }
            SyncResult::TransientFailureExhausted { attempts, .. } => Some(format!(
                "Mercado Libre unreachable after {attempts} attempts; sync pending"
            )),
        }
    }
}

/// Pushes local product state to the marketplace.
///
/// Shared state (token, rate-limit flag) lives in the injected components, so
/// every concurrent sync observes refreshes and throttling by the others.
pub struct SyncWorkflow {
    gate: RateLimitGate,
    tokens: Arc<TokenStore>,
    api: Arc<dyn MarketplaceApi>,
    log: SyncLog,
    monitor: MeliMonitor,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl SyncWorkflow {
    pub fn new(
        gate: RateLimitGate,
        tokens: Arc<TokenStore>,
        api: Arc<dyn MarketplaceApi>,
        log: SyncLog,
        monitor: MeliMonitor,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            tokens,
            api,
            log,
            monitor,
            retry,
            clock,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    pub fn monitor(&self) -> &MeliMonitor {
        &self.monitor
    }

    #[instrument(skip(self, remote_item_id, local), fields(item_id = %remote_item_id))]
    pub async fn sync_product(
        &self,
        product_id: i64,
        remote_item_id: &str,
        local: &ProductSnapshot,
    ) -> SyncResult {
        if self.gate.is_limited().await {
            info!("rate limit in effect, skipping remote update");
            return SyncResult::RateLimited;
        }

        let token = match self.tokens.get_valid_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!("cannot obtain marketplace token: {}", e);
                let reason = e.to_string();
                let details = format!("auth failed: {reason}");
                self.log
                    .record(product_id, remote_item_id, false, Some(details))
                    .await;
                return SyncResult::AuthFailed { reason };
            }
        };

        let payload = build_item_payload(local);
        let access_token = token.access_token.as_str();
        let payload = &payload;
        let mut attempts = 0u32;

        let result = self
            .retry
            .run(self.clock.as_ref(), || {
                attempts += 1;
                async move {
                    let started = Instant::now();
                    let result = self
                        .api
                        .update_item(access_token, remote_item_id, payload)
                        .await;
                    self.monitor
                        .log_api_call(ITEM_UPDATE_ENDPOINT, result.is_ok(), started.elapsed())
                        .await;
                    result
                }
            })
            .await;

        self.interpret(product_id, remote_item_id, result, attempts).await
    }

    /// Like [`sync_product`](Self::sync_product), but gives up after `limit`.
    ///
    /// Dropping the in-flight sync is safe: a token is only stored once a refresh
    /// has fully completed, and the gate is a single write.
    pub async fn sync_product_within(
        &self,
        limit: Duration,
        product_id: i64,
        remote_item_id: &str,
        local: &ProductSnapshot,
    ) -> Option<SyncResult> {
        let sync = self.sync_product(product_id, remote_item_id, local);
        match tokio::time::timeout(limit, sync).await {
            Ok(result) => Some(result),
            Err(_) => {
                warn!(product_id, item_id = remote_item_id, "marketplace sync timed out");
                None
            }
        }
    }

    async fn interpret(
        &self,
        product_id: i64,
        remote_item_id: &str,
        result: Result<Value, MeliError>,
        attempts: u32,
    ) -> SyncResult {
        match result {
            Ok(remote) => {
                info!(attempts, "product synced");
                self.log.record(product_id, remote_item_id, true, None).await;
                SyncResult::Success { remote }
            }
            Err(MeliError::Decode(e)) => {
                // 2xx with an unreadable body: the update was applied
                warn!("item updated but response was unreadable: {}", e);
                self.log.record(product_id, remote_item_id, true, None).await;
                SyncResult::Success {
                    remote: Value::Null,
                }
            }
            Err(MeliError::RateLimited { retry_after }) => {
                let cooldown = self.gate.set_from_retry_after(retry_after).await;
                self.log
                    .record(
                        product_id,
                        remote_item_id,
                        false,
                        Some(format!("rate limited (retry after {cooldown}s)")),
                    )
                    .await;
                SyncResult::RateLimited
            }
            Err(MeliError::Rejected { status, body }) => {
                warn!(status, "marketplace rejected item update");
                self.log
                    .record(product_id, remote_item_id, false, Some(body.clone()))
                    .await;
                SyncResult::RemoteRejected {
                    status,
                    details: body,
                }
            }
            Err(e) => {
                debug_assert!(e.is_retryable());
                let last_error = e.to_string();
                self.log
                    .record(
                        product_id,
                        remote_item_id,
                        false,
                        Some(format!("gave up after {attempts} attempts: {last_error}")),
                    )
                    .await;
                SyncResult::TransientFailureExhausted {
                    attempts,
                    last_error,
                }
            }
        }
    }
}
