//! HTTP client for the Mercado Libre REST API.
//!
//! Only two endpoints matter here:
//! - `POST /oauth/token` to refresh (or first obtain) the access token
//! - `PUT /items/{id}` to push a product update
//!
//! Responses are classified into [`MeliError`] variants so the retry policy can
//! tell transient failures from deliberate rejections.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::config::MeliConfig;
use crate::errors::MeliError;
use crate::models::token::TokenGrant;

#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, MeliError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MeliError>;

    async fn update_item(
        &self,
        access_token: &str,
        item_id: &str,
        payload: &Value,
    ) -> Result<Value, MeliError>;
}

pub struct MeliClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl MeliClient {
    pub fn new(config: &MeliConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, MeliError> {
        let resp = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let resp = classify(resp).await?;
        let grant = resp.json::<TokenGrant>().await?;
        Ok(grant)
    }
}

#[async_trait]
impl MarketplaceApi for MeliClient {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, MeliError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, MeliError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn update_item(
        &self,
        access_token: &str,
        item_id: &str,
        payload: &Value,
    ) -> Result<Value, MeliError> {
        let resp = self
            .http
            .put(format!("{}/items/{}", self.base_url, item_id))
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await?;

        let resp = classify(resp).await?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| MeliError::Decode(e.to_string()))
    }
}

/// Pass 2xx through; turn everything else into the matching error.
async fn classify(resp: Response) -> Result<Response, MeliError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MeliError::RateLimited {
            retry_after: parse_retry_after(&resp),
        });
    }

    let body = resp.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(MeliError::Server {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(MeliError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn parse_retry_after(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout_secs: u64) -> MeliClient {
        MeliClient::new(&MeliConfig {
            client_id: "app-1".into(),
            client_secret: "s3cret".into(),
            api_base_url: server.uri(),
            request_timeout_secs: timeout_secs,
            ..MeliConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn refresh_posts_form_and_parses_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=TG-1"))
            .and(body_string_contains("client_id=app-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "APP_USR-2",
                "refresh_token": "TG-2",
                "expires_in": 21600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client_for(&server, 5).refresh_token("TG-1").await.unwrap();
        assert_eq!(grant.access_token, "APP_USR-2");
        assert_eq!(grant.expires_in, 21600);
    }

    #[tokio::test]
    async fn refresh_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 5).refresh_token("stale").await.unwrap_err();
        match err {
            MeliError::Rejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_item_sends_bearer_and_classifies() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items/MLA1"))
            .and(header("authorization", "Bearer APP_USR-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "MLA1"})))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/items/MLA429"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/items/MLA503"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client_for(&server, 5);
        let payload = json!({"title": "x"});

        let ok = client.update_item("APP_USR-1", "MLA1", &payload).await.unwrap();
        assert_eq!(ok["id"], "MLA1");

        let limited = client.update_item("APP_USR-1", "MLA429", &payload).await.unwrap_err();
        assert!(matches!(limited, MeliError::RateLimited { retry_after: Some(30) }));

        let down = client.update_item("APP_USR-1", "MLA503", &payload).await.unwrap_err();
        assert!(matches!(down, MeliError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn non_numeric_retry_after_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items/MLA1"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 5)
            .update_item("t", "MLA1", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MeliError::RateLimited { retry_after: None }));
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/items/MLA1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = client_for(&server, 1)
            .update_item("t", "MLA1", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MeliError::Timeout));
    }
}
