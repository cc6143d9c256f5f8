use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::meli::monitor::DailyMetrics;
use crate::meli::SyncResult;
use crate::models::product::{ProductRow, ProductUpdate};
use crate::models::sync_log::{SyncLogRow, SyncLogSummary};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct SyncLogParams {
    pub product_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct TokenStatus {
    pub authorized: bool,
    pub valid: bool,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct MeliStatusResponse {
    pub token: TokenStatus,
    pub rate_limited: bool,
    pub rate_limited_until: Option<chrono::DateTime<Utc>>,
    pub last_24h: SyncLogSummary,
}

// ── Handlers ─────────────────────────────────────────────────

/// PUT /api/v1/products/:id: apply a local edit, then push it to the marketplace.
///
/// The local update is committed first and is never rolled back; a failed sync
/// only adds a `warning` to the response.
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<ProductUpdate>,
) -> Result<Json<Value>, AppError> {
    update.validate().map_err(AppError::BadRequest)?;

    let product = state
        .db
        .update_product(id, &update)
        .await?
        .ok_or(AppError::ProductNotFound(id))?;

    let meli_sync = match product.meli_item_id.as_deref() {
        Some(item_id) => Some(sync_now(&state, &product, item_id).await),
        None => None,
    };

    let mut body = json!({
        "success": true,
        "data": product,
        "meli_sync": meli_sync.as_ref().map(|(v, _)| v),
    });
    if let Some((_, Some(warning))) = meli_sync {
        body["warning"] = json!(warning);
    }

    Ok(Json(body))
}

/// POST /api/v1/products/:id/sync: push the current local state on demand.
pub async fn sync_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let product = state
        .db
        .get_product(id)
        .await?
        .ok_or(AppError::ProductNotFound(id))?;

    let item_id = product
        .meli_item_id
        .as_deref()
        .ok_or(AppError::NotListed(id))?;

    let (meli_sync, warning) = sync_now(&state, &product, item_id).await;

    let mut body = json!({
        "success": true,
        "product_id": id,
        "meli_sync": meli_sync,
    });
    if let Some(warning) = warning {
        body["warning"] = json!(warning);
    }

    Ok(Json(body))
}

/// GET /api/v1/sync-log: newest first, optionally for one product.
pub async fn list_sync_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncLogParams>,
) -> Result<Json<Vec<SyncLogRow>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let rows = state
        .db
        .list_sync_logs(params.product_id, limit, offset)
        .await?;

    Ok(Json(rows))
}

/// GET /api/v1/meli/status
pub async fn meli_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MeliStatusResponse>, AppError> {
    let now = Utc::now();
    let token = state.sync.tokens().current().await?;
    let flag = state.sync.gate().flag().await;
    let last_24h = state
        .db
        .sync_log_summary_since(now - Duration::hours(24))
        .await?;

    Ok(Json(MeliStatusResponse {
        token: TokenStatus {
            authorized: token.is_some(),
            valid: token.as_ref().is_some_and(|t| t.is_valid_at(now)),
            expires_at: token.map(|t| t.expires_at),
        },
        rate_limited: flag.is_some(),
        rate_limited_until: flag.map(|f| f.until),
        last_24h,
    }))
}

/// GET /api/v1/meli/metrics: today's API call metrics.
pub async fn meli_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DailyMetrics>, AppError> {
    let metrics = state.sync.monitor().daily_metrics().await?;
    Ok(Json(metrics))
}

/// GET /api/v1/meli/callback?code=...: OAuth redirect target.
pub async fn meli_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, AppError> {
    if let Some(error) = params.error {
        return Err(AppError::BadRequest(format!(
            "authorization denied by marketplace: {}",
            error
        )));
    }
    let code = params
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("missing authorization code".into()))?;

    let token = state.sync.tokens().authorize_with_code(code.trim()).await?;
    tracing::info!(expires_at = %token.expires_at, "marketplace authorization stored");

    Ok(Json(json!({
        "success": true,
        "expires_at": token.expires_at,
    })))
}

/// Run one bounded sync and render it for a response body.
async fn sync_now(
    state: &AppState,
    product: &ProductRow,
    item_id: &str,
) -> (Value, Option<String>) {
    let deadline = state.config.sync_deadline();
    let outcome = state
        .sync
        .sync_product_within(deadline, product.id, item_id, &product.snapshot())
        .await;

    match outcome {
        Some(result) => (sync_result_json(&result), result.warning()),
        None => (
            json!({"status": "timed_out"}),
            Some("Mercado Libre sync did not finish in time; sync pending".to_string()),
        ),
    }
}

fn sync_result_json(result: &SyncResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|_| json!({"status": "unknown"}))
}
