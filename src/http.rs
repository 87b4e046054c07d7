//! JSON-over-HTTP plumbing shared by the embedding and chat clients.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use crate::config::ApiAuth;

/// Failure of a JSON POST after retries have been applied.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("API key environment variable {0} not set")]
    MissingApiKey(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// An OpenAI-compatible endpoint with its credentials.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub auth: ApiAuth,
}

impl ApiEndpoint {
    /// Resolve the API key from the named environment variable.
    pub fn from_env(base_url: &str, api_key_env: &str, auth: ApiAuth) -> Result<Self, HttpError> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| HttpError::MissingApiKey(api_key_env.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            auth,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, HttpError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` to `endpoint/path`, retrying transient failures.
pub async fn post_json(
    client: &reqwest::Client,
    endpoint: &ApiEndpoint,
    path: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, HttpError> {
    let url = endpoint.url(path);
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!("retrying {} in {:?} (attempt {})", url, delay, attempt);
            tokio::time::sleep(delay).await;
        }

        let request = client.post(&url).json(body);
        let request = match endpoint.auth {
            ApiAuth::Bearer => request.bearer_auth(&endpoint.api_key),
            ApiAuth::ApiKey => request.header("api-key", &endpoint.api_key),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = HttpError::Status {
                    status: status.as_u16(),
                    body: body_text,
                };

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!("{}", err);
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                tracing::warn!("request to {} failed: {}", url, e);
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or(HttpError::Status {
        status: 0,
        body: "request failed after retries".to_string(),
    }))
}
