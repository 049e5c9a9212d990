//! Credential refresh loop.
//!
//! Runs on the connect reply's TTL (or immediately, if the server reports the
//! credentials already expired). Re-issues credentials via the user's
//! [`crate::config::RefreshCallback`] or a POST to `config.refresh_endpoint`, using
//! the teacher's HTTP retry machinery (`http.rs`) for the underlying request —
//! `RetryPolicy::None`, since this module's own attempt counter is the retry loop
//! that matters here.

use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::error::{SdkError, WsError};
use crate::http::{HttpClient, RefreshResponse};
use crate::retry::RetryPolicy;

/// Tracks consecutive refresh failures across the session's lifetime (reset to zero
/// on a successful refresh).
#[derive(Default)]
pub struct RefreshState {
    pub num_failed: u32,
}

impl RefreshState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the configured attempt cap has been reached. `None` means unbounded.
    pub fn exhausted(&self, config: &Config) -> bool {
        matches!(config.refresh_attempts, Some(cap) if self.num_failed >= cap)
    }

    pub fn record_failure(&mut self) {
        self.num_failed += 1;
    }

    pub fn record_success(&mut self) {
        self.num_failed = 0;
    }

    /// Delay before the next retry: `refresh_retry_base_ms + uniform(0, 1000)`.
    pub fn next_retry_delay(&self, config: &Config) -> Duration {
        let jitter = rand::random::<u64>() % 1_000;
        Duration::from_millis(config.refresh_retry_base_ms + jitter)
    }
}

/// Runs the refresh procedure once: either the user callback or an HTTP POST, then
/// merges the response's named keys (`user`, `exp`, `info`, `sign`) into the stored
/// credentials value.
pub async fn refresh_once(
    config: &Config,
    http: &HttpClient,
    current_credentials: &Value,
) -> Result<Value, SdkError> {
    if config.refresh_disabled() {
        return Err(SdkError::Ws(WsError::RefreshFailed));
    }

    let response = if let Some(callback) = &config.on_refresh {
        callback(current_credentials.clone()).await?
    } else {
        let Some(endpoint) = &config.refresh_endpoint else {
            return Err(SdkError::Ws(WsError::RefreshFailed));
        };
        let parsed: RefreshResponse = http
            .post_json(endpoint, &config.refresh_body, &config.refresh_headers, &config.refresh_params, RetryPolicy::None)
            .await?;
        serde_json::to_value(&parsed).map_err(SdkError::Serde)?
    };

    Ok(merge_credentials(current_credentials, &response))
}

fn merge_credentials(current: &Value, update: &Value) -> Value {
    let mut merged = current.clone();
    if !merged.is_object() {
        merged = Value::Object(Default::default());
    }
    let Some(merged_map) = merged.as_object_mut() else { return merged };
    if let Some(update_map) = update.as_object() {
        for (key, value) in update_map {
            if !value.is_null() {
                merged_map.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_state_exhausted_respects_cap() {
        let mut config = Config::default();
        config.refresh_attempts = Some(2);
        let mut state = RefreshState::new();
        assert!(!state.exhausted(&config));
        state.record_failure();
        assert!(!state.exhausted(&config));
        state.record_failure();
        assert!(state.exhausted(&config));
    }

    #[test]
    fn test_refresh_state_unbounded_never_exhausted() {
        let config = Config::default();
        let mut state = RefreshState::new();
        for _ in 0..100 {
            state.record_failure();
        }
        assert!(!state.exhausted(&config));
    }

    #[test]
    fn test_record_success_resets_counter() {
        let mut state = RefreshState::new();
        state.record_failure();
        state.record_failure();
        state.record_success();
        assert_eq!(state.num_failed, 0);
    }

    #[test]
    fn test_merge_credentials_overwrites_named_keys_only() {
        let current = serde_json::json!({"token": "old", "extra": "kept"});
        let update = serde_json::json!({"user": "u1", "exp": 123, "sign": "abc"});
        let merged = merge_credentials(&current, &update);
        assert_eq!(merged["extra"], "kept");
        assert_eq!(merged["user"], "u1");
        assert_eq!(merged["exp"], 123);
        assert_eq!(merged["sign"], "abc");
    }

    #[tokio::test]
    async fn test_refresh_disabled_by_zero_attempts() {
        let mut config = Config::default();
        config.refresh_attempts = Some(0);
        let http = HttpClient::new();
        let result = refresh_once(&config, &http, &Value::Null).await;
        assert!(matches!(result, Err(SdkError::Ws(WsError::RefreshFailed))));
    }

    #[tokio::test]
    async fn test_refresh_with_no_endpoint_or_callback_fails() {
        let config = Config::default();
        let http = HttpClient::new();
        let result = refresh_once(&config, &http, &Value::Null).await;
        assert!(matches!(result, Err(SdkError::Ws(WsError::RefreshFailed))));
    }
}
