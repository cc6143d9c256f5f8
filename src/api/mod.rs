use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the sync API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
/// The OAuth callback stays public since the marketplace redirects the seller's browser to it.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let admin = Router::new()
        .route("/products/:id", put(handlers::update_product))
        .route("/products/:id/sync", post(handlers::sync_product))
        .route("/sync-log", get(handlers::list_sync_log))
        .route("/meli/status", get(handlers::meli_status))
        .route("/meli/metrics", get(handlers::meli_metrics))
        .route_layer(middleware::from_fn_with_state(state, admin_auth));

    Router::new()
        .route("/meli/callback", get(handlers::meli_callback))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the configured admin key.
/// Returns 401 if missing/invalid, 500 if no key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let Some(expected) = state.config.admin_key() else {
        tracing::error!("MELI_SYNC_ADMIN_KEY is not set, refusing admin request");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    match provided_key {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // never log the full provided key
            let masked = match (k.get(..4), k.len() > 8) {
                (Some(head), true) => format!("{}…", head),
                _ => "****".to_string(),
            };
            tracing::warn!(provided = %masked, "admin API: invalid key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use crate::config;
    use crate::meli::MeliClient;
    use crate::store::postgres::PgStore;
    use axum::body::Body;
    use tower::ServiceExt;

    fn state(admin_key: Option<&str>) -> Arc<AppState> {
        let mut cfg = config::from_lookup(|name| match name {
            "MELI_CLIENT_ID" => Some("app-1".into()),
            "MELI_CLIENT_SECRET" => Some("s3cret".into()),
            _ => None,
        })
        .unwrap();
        cfg.admin_key = admin_key.map(String::from);

        // Lazy pool: none of these requests reach the database.
        let db = PgStore::connect_lazy("postgres://localhost/unused").unwrap();
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(MemoryStore::new(clock.clone()));
        let api = Arc::new(MeliClient::new(&cfg.meli).unwrap());
        Arc::new(AppState::new(cfg, db, kv, api, clock))
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .nest("/api/v1", api_router(state.clone()))
            .with_state(state)
    }

    async fn status_of(app: Router, req: axum::http::Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn admin_routes_require_key() {
        let app = app(state(Some("admin-key-123")));
        let req = axum::http::Request::get("/api/v1/sync-log")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let app = app(state(Some("admin-key-123")));
        let req = axum::http::Request::post("/api/v1/products/1/sync")
            .header("x-admin-key", "nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_key_fails_closed() {
        let app = app(state(None));
        let req = axum::http::Request::get("/api/v1/meli/metrics")
            .header("x-admin-key", "anything")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn metrics_are_served_with_valid_key() {
        let app = app(state(Some("admin-key-123")));
        let req = axum::http::Request::get("/api/v1/meli/metrics")
            .header("authorization", "Bearer admin-key-123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn callback_is_public_but_needs_code() {
        let app = app(state(Some("admin-key-123")));
        let req = axum::http::Request::get("/api/v1/meli/callback")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = app(state(Some("admin-key-123")));
        let req = axum::http::Request::get("/api/v1/nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(app, req).await, StatusCode::NOT_FOUND);
    }
}
