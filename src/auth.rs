//! Private-channel authorization batching.
//!
//! A channel whose name starts with `config.private_channel_prefix` requires
//! authorization before it can be subscribed. Rather than one HTTP round-trip per
//! channel, callers may wrap a burst of private subscribes in
//! `start_auth_batching()`/`stop_auth_batching()` so one request authorizes all of
//! them at once. There is no teacher precedent for this (the teacher's channels are
//! not access-controlled); the request/response shape here follows `http.rs`'s
//! generic POST-JSON client, same as `refresh.rs`.

use std::collections::HashSet;

use crate::config::Config;
use crate::error::{SdkError, WsError};
use crate::http::{AuthResponse, HttpClient};
use crate::retry::RetryPolicy;

/// Collects private channels awaiting bulk authorization.
#[derive(Default)]
pub struct AuthBatch {
    active: bool,
    channels: HashSet<String>,
}

impl AuthBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn add(&mut self, channel: &str) {
        self.channels.insert(channel.to_string());
    }

    /// Stops batching and returns the collected channels, clearing the set.
    pub fn stop(&mut self) -> Vec<String> {
        self.active = false;
        self.channels.drain().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[derive(serde::Serialize)]
struct AuthRequest<'a> {
    client: &'a str,
    channels: &'a [String],
}

/// Authorizes a batch of private channels, via the user's
/// [`crate::config::AuthCallback`] or a POST to `config.auth_endpoint`.
pub async fn authorize(
    config: &Config,
    http: &HttpClient,
    client: &str,
    channels: &[String],
) -> Result<AuthResponse, SdkError> {
    if channels.is_empty() {
        return Ok(AuthResponse::new());
    }

    if let Some(callback) = &config.on_auth {
        let body = serde_json::json!({ "client": client, "channels": channels });
        let value = callback(body).await?;
        return serde_json::from_value(value).map_err(SdkError::Serde);
    }

    let Some(endpoint) = &config.auth_endpoint else {
        return Err(SdkError::Ws(WsError::AuthorizationFailed));
    };

    let request = AuthRequest { client, channels };
    http.post_json(endpoint, &request, &config.auth_headers, &config.auth_params, RetryPolicy::None)
        .await
        .map_err(|e| {
            tracing::warn!("private-channel authorization request failed: {e}");
            SdkError::Ws(WsError::AuthorizationFailed)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_and_add() {
        let mut batch = AuthBatch::new();
        assert!(!batch.is_active());
        batch.start();
        assert!(batch.is_active());
        batch.add("$news");
        batch.add("$news");
        let drained = batch.stop();
        assert_eq!(drained, vec!["$news".to_string()]);
        assert!(!batch.is_active());
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_authorize_empty_channels_is_noop() {
        let config = Config::default();
        let http = HttpClient::new();
        let result = authorize(&config, &http, "client-1", &[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_authorize_without_endpoint_or_callback_fails() {
        let config = Config::default();
        let http = HttpClient::new();
        let result = authorize(&config, &http, "client-1", &["$news".to_string()]).await;
        assert!(matches!(result, Err(SdkError::Ws(WsError::AuthorizationFailed))));
    }
}
