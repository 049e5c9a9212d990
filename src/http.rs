//! Generic HTTP side-channel client — carried over from the teacher's
//! `http::client::LightconeHttp`, generalized from a REST API surface (many
//! domain-specific `get`/`post` call sites) down to the two side-channels this
//! protocol needs: credential refresh and private-channel authorization, both
//! POST-JSON-in, POST-JSON-out.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HttpError;
use crate::retry::{RetryConfig, RetryPolicy};

/// Generic POST-JSON client with header/query injection and a pluggable retry policy.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        let mut builder = Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        {
            builder = builder.timeout(Duration::from_secs(30));
        }
        Self { client: builder.build().expect("failed to build HTTP client") }
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        headers: &HashMap<String, String>,
        params: &HashMap<String, String>,
        retry: RetryPolicy,
    ) -> Result<T, HttpError> {
        self.request_with_retry(url, body, headers, params, retry).await
    }

    async fn request_with_retry<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        headers: &HashMap<String, String>,
        params: &HashMap<String, String>,
        retry: RetryPolicy,
    ) -> Result<T, HttpError> {
        let config = match &retry {
            RetryPolicy::None => return self.do_post(url, body, headers, params).await,
            RetryPolicy::Idempotent => RetryConfig::idempotent(),
            RetryPolicy::Custom(c) => c.clone(),
        };

        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.do_post::<T, B>(url, body, headers, params).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    let should_retry = match &e {
                        HttpError::ServerError { status, .. } => config.retryable_statuses.contains(status),
                        HttpError::RateLimited { retry_after_ms } => {
                            if let Some(ms) = retry_after_ms {
                                futures_timer::Delay::new(Duration::from_millis(*ms)).await;
                            }
                            true
                        }
                        HttpError::Timeout => true,
                        #[cfg(feature = "http")]
                        HttpError::Reqwest(re) => {
                            #[cfg(not(target_arch = "wasm32"))]
                            let retryable = re.is_connect() || re.is_timeout() || re.is_request();
                            #[cfg(target_arch = "wasm32")]
                            let retryable = re.is_timeout() || re.is_request();
                            retryable
                        }
                        _ => false,
                    };

                    if should_retry && attempt < config.max_retries {
                        let delay = config.delay_for_attempt(attempt);
                        tracing::debug!(attempt = attempt + 1, max = config.max_retries, "retrying request to {url}");
                        futures_timer::Delay::new(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(HttpError::MaxRetriesExceeded {
            attempts: config.max_retries + 1,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        headers: &HashMap<String, String>,
        params: &HashMap<String, String>,
    ) -> Result<T, HttpError> {
        let mut req = self.client.post(url).json(body);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if !params.is_empty() {
            req = req.query(&params.iter().collect::<Vec<_>>());
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            let parsed = resp.json::<T>().await?;
            return Ok(parsed);
        }

        let status_code = status.as_u16();
        let body_text = resp.text().await.unwrap_or_default();

        match status_code {
            401 => Err(HttpError::Unauthorized),
            404 => Err(HttpError::NotFound(body_text)),
            429 => Err(HttpError::RateLimited { retry_after_ms: None }),
            400..=499 => Err(HttpError::BadRequest(body_text)),
            _ => Err(HttpError::ServerError { status: status_code, body: body_text }),
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of a refresh-endpoint response: `{user, exp, info?, sign}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RefreshResponse {
    pub user: Option<String>,
    pub exp: Option<i64>,
    pub info: Option<Value>,
    pub sign: Option<String>,
}

/// Shape of an auth-endpoint response: `{channel: {status?, info, sign}}`.
pub type AuthResponse = HashMap<String, ChannelAuth>;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChannelAuth {
    pub status: Option<u16>,
    pub info: Option<Value>,
    pub sign: Option<String>,
}
