use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub admin_key: Option<String>,
    pub meli: MeliConfig,
    pub retry: RetryPolicy,
    /// Days of sync log history to keep. 0 = keep forever.
    pub log_retention_days: u32,
}

/// Marketplace application credentials and endpoints.
#[derive(Debug, Clone)]
pub struct MeliConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Refresh token used when no token has been stored yet.
    pub refresh_token: Option<String>,
    pub api_base_url: String,
    pub auth_url: String,
    pub request_timeout_secs: u64,
}

impl MeliConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// URL the seller opens to grant this application access.
    pub fn authorization_url(&self) -> anyhow::Result<reqwest::Url> {
        let base = format!("{}/authorization", self.auth_url.trim_end_matches('/'));
        let url = reqwest::Url::parse_with_params(
            &base,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
            ],
        )?;
        Ok(url)
    }
}

impl Default for MeliConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8000/api/v1/meli/callback".into(),
            refresh_token: None,
            api_base_url: "https://api.mercadolibre.com".into(),
            auth_url: "https://auth.mercadolibre.com.ar".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Returns the admin key for API authentication, if one is configured.
    pub fn admin_key(&self) -> Option<&str> {
        self.admin_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Upper bound for one request-triggered sync: every attempt timing out plus
    /// every backoff wait, with a little slack for the token refresh.
    pub fn sync_deadline(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        let waits = (1..attempts)
            .map(|a| self.retry.backoff(a))
            .fold(Duration::ZERO, Duration::saturating_add);
        self.meli
            .request_timeout()
            .saturating_mul(attempts.saturating_add(1))
            .saturating_add(waits)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|name| std::env::var(name).ok())
}

/// Build the configuration from an arbitrary variable source.
pub fn from_lookup<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = MeliConfig::default();
    let retry_defaults = RetryPolicy::default();

    let client_id = var("MELI_CLIENT_ID").unwrap_or_default();
    let client_secret = var("MELI_CLIENT_SECRET").unwrap_or_default();

    if client_id.is_empty() || client_secret.is_empty() {
        let env_mode = var("MELI_SYNC_ENV")
            .or_else(|| var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "MELI_CLIENT_ID and MELI_CLIENT_SECRET must be set before running in production."
            );
        }
        eprintln!(
            "⚠️  MELI_CLIENT_ID / MELI_CLIENT_SECRET are not set; \
             marketplace sync will fail to authorize."
        );
    }

    let meli = MeliConfig {
        client_id,
        client_secret,
        redirect_uri: var("MELI_REDIRECT_URI").unwrap_or(defaults.redirect_uri),
        refresh_token: var("MELI_REFRESH_TOKEN").filter(|t| !t.is_empty()),
        api_base_url: var("MELI_API_BASE_URL").unwrap_or(defaults.api_base_url),
        auth_url: var("MELI_AUTH_URL").unwrap_or(defaults.auth_url),
        request_timeout_secs: parsed(
            &var,
            "MELI_SYNC_TIMEOUT_SECS",
            defaults.request_timeout_secs,
        ),
    };

    let retry = RetryPolicy {
        max_attempts: parsed(&var, "MELI_SYNC_MAX_ATTEMPTS", retry_defaults.max_attempts).max(1),
        initial_delay_ms: parsed(
            &var,
            "MELI_SYNC_INITIAL_DELAY_MS",
            retry_defaults.initial_delay_ms,
        ),
        backoff_multiplier: parsed(
            &var,
            "MELI_SYNC_BACKOFF_MULTIPLIER",
            retry_defaults.backoff_multiplier,
        ),
        max_delay_ms: parsed(&var, "MELI_SYNC_MAX_DELAY_MS", retry_defaults.max_delay_ms),
        jitter_ms: parsed(&var, "MELI_SYNC_JITTER_MS", retry_defaults.jitter_ms),
    };

    Ok(Config {
        port: parsed(&var, "MELI_SYNC_PORT", 8000),
        database_url: var("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/supplements_crm".into()),
        redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
        admin_key: var("MELI_SYNC_ADMIN_KEY"),
        meli,
        retry,
        log_retention_days: parsed(&var, "MELI_SYNC_LOG_RETENTION_DAYS", 90),
    })
}

fn parsed<F, T>(var: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    var(name)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
