//! OAuth2 client-credentials token cache for the build service.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ClientError;

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Default)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-wide bearer token, fetched on first use and reused until it
/// nears expiry. Concurrent callers wait on the same mutex while one of
/// them refreshes.
pub struct LazyToken {
    url: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
    cached: Mutex<CachedToken>,
}

impl LazyToken {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client: reqwest::Client::new(),
            cached: Mutex::new(CachedToken::default()),
        }
    }

    /// Current token, refreshing it if empty or about to expire.
    pub async fn token(&self) -> Result<String, ClientError> {
        self.acquire(false).await
    }

    /// Fetch a new token regardless of the cached one. Used after the
    /// build service answered 401/403.
    pub async fn force_refresh(&self) -> Result<String, ClientError> {
        self.acquire(true).await
    }

    async fn acquire(&self, force: bool) -> Result<String, ClientError> {
        let mut cached = self.cached.lock().await;

        let stale = match cached.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) > expires_at,
            None => true,
        };

        if force || stale || cached.access_token.is_empty() {
            let fresh = self.request_token().await?;
            let expires_at = Utc::now() + Duration::seconds(fresh.expires_in);
            cached.access_token = fresh.access_token;
            cached.expires_at = Some(expires_at);
            info!(%expires_at, "Acquired new build service token");
        } else {
            debug!("Reusing build service token");
        }

        Ok(cached.access_token.clone())
    }

    async fn request_token(&self) -> Result<TokenResponse, ClientError> {
        if self.client_secret.is_empty() {
            return Err(ClientError::Token(
                "client id and client secret must be set".to_string(),
            ));
        }

        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self.client.post(&self.url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Token(format!(
                "request failed with status code {}: {}",
                status.as_u16(),
                body
            )));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
