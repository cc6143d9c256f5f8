use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meli_sync::cache::{KvStore, TieredCache};
use meli_sync::clock::{Clock, SystemClock};
use meli_sync::meli::{MeliClient, SyncResult};
use meli_sync::store::postgres::PgStore;
use meli_sync::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "meli-sync"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "meli_sync=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Sync { product_id }) => {
            let state = connect_state(cfg).await?;
            handle_sync_command(product_id, &state).await
        }
        Some(cli::Commands::Token { command }) => {
            let state = connect_state(cfg).await?;
            handle_token_command(command, &state).await
        }
        Some(cli::Commands::Auth { command }) => handle_auth_command(command, cfg).await,
        Some(cli::Commands::Log { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_log_command(command, &db).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Connect Postgres and Redis and wire the sync workflow.
async fn connect_state(cfg: config::Config) -> anyhow::Result<Arc<AppState>> {
    let (state, _) = connect_state_with_cache(cfg).await?;
    Ok(state)
}

async fn connect_state_with_cache(
    cfg: config::Config,
) -> anyhow::Result<(Arc<AppState>, Arc<TieredCache>)> {
    let db = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let redis_client = redis::Client::open(cfg.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to Redis")?;
    let cache = Arc::new(TieredCache::new(redis_conn));

    let api = Arc::new(MeliClient::new(&cfg.meli)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv: Arc<dyn KvStore> = cache.clone();

    let state = Arc::new(AppState::new(cfg, db, kv, api, clock));
    Ok((state, cache))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    if cfg.admin_key().is_none() {
        tracing::warn!("MELI_SYNC_ADMIN_KEY is not set; admin routes will refuse every request");
    }

    tracing::info!("Connecting to database and Redis...");
    let (state, cache) = connect_state_with_cache(cfg).await?;

    tracing::info!("Running migrations...");
    state.db.migrate().await?;

    let app = axum::Router::new()
        // Health endpoints (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .route("/readyz", axum::routing::get(readiness_check))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state.clone())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let dashboard_origin = std::env::var("DASHBOARD_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    jobs::cleanup::spawn(state.db.clone(), state.config.log_retention_days);

    // L1 entries only expire lazily; sweep them so the map stays small
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let evicted = cache.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired cache entries");
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("meli-sync listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: tags every response with a unique X-Request-Id.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Middleware: security headers for an API that only ever returns JSON.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    // the OAuth callback URL carries the authorization code
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_sync_command(product_id: i64, state: &Arc<AppState>) -> anyhow::Result<()> {
    let product = state
        .db
        .get_product(product_id)
        .await?
        .with_context(|| format!("product {} not found", product_id))?;
    let item_id = product
        .meli_item_id
        .as_deref()
        .with_context(|| format!("product {} has no Mercado Libre listing", product_id))?;

    let result = state
        .sync
        .sync_product(product.id, item_id, &product.snapshot())
        .await;

    match &result {
        SyncResult::Success { .. } => println!("Product {} synced to {}.", product_id, item_id),
        other => {
            println!("Sync failed: {}", serde_json::to_string(other)?);
            if let Some(warning) = other.warning() {
                println!("  {}", warning);
            }
        }
    }
    Ok(())
}

async fn handle_token_command(
    cmd: cli::TokenCommands,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Show => match state.sync.tokens().current().await? {
            Some(token) => {
                let now = chrono::Utc::now();
                println!(
                    "Token expires at {} ({})",
                    token.expires_at,
                    if token.is_valid_at(now) { "valid" } else { "expired" }
                );
            }
            None => println!("No token stored. Run `meli-sync auth url` to authorize."),
        },
        cli::TokenCommands::Refresh => {
            let token = state.sync.tokens().force_refresh().await?;
            println!("Token refreshed. Expires at {}.", token.expires_at);
        }
    }
    Ok(())
}

async fn handle_auth_command(cmd: cli::AuthCommands, cfg: config::Config) -> anyhow::Result<()> {
    match cmd {
        cli::AuthCommands::Url => {
            println!("{}", cfg.meli.authorization_url()?);
        }
        cli::AuthCommands::Exchange { code } => {
            let state = connect_state(cfg).await?;
            let token = state.sync.tokens().authorize_with_code(&code).await?;
            println!("Authorized. Token expires at {}.", token.expires_at);
        }
    }
    Ok(())
}

async fn handle_log_command(cmd: cli::LogCommands, db: &PgStore) -> anyhow::Result<()> {
    match cmd {
        cli::LogCommands::List { product_id, limit } => {
            let rows = db.list_sync_logs(product_id, limit.clamp(1, 500), 0).await?;
            if rows.is_empty() {
                println!("No sync log entries found.");
                return Ok(());
            }
            println!(
                "{:<26} {:<10} {:<16} {:<8} {}",
                "TIME", "PRODUCT", "ITEM", "OK", "DETAILS"
            );
            for r in rows {
                println!(
                    "{:<26} {:<10} {:<16} {:<8} {}",
                    r.created_at.format("%Y-%m-%d %H:%M:%S"),
                    r.product_id,
                    r.remote_item_id,
                    r.success,
                    r.error_details.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
