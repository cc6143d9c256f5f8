use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single active marketplace credential pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Build the stored token from a grant issued at `issued_at`.
    /// Keeps `previous_refresh` when the provider did not rotate it.
    /// `None` when `expires_in` does not give a representable expiry.
    pub fn from_grant(
        grant: TokenGrant,
        issued_at: DateTime<Utc>,
        previous_refresh: &str,
    ) -> Option<Self> {
        let lifetime = chrono::Duration::try_seconds(grant.expires_in)?;
        let expires_at = issued_at.checked_add_signed(lifetime)?;
        Some(Self {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| previous_refresh.to_string()),
            expires_at,
        })
    }
}

/// Body of a successful OAuth token response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
}
