//! Session configuration — named options with fixed defaults.
//!
//! Every field the protocol spec names has a home here; there is no open option bag,
//! so there is no "unknown option" case — unrecognized input simply doesn't compile.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::SdkError;

/// Result of a user-supplied refresh callback.
pub type RefreshOutcome = Result<Value, SdkError>;

/// Result of a user-supplied private-channel authorization callback.
pub type AuthOutcome = Result<Value, SdkError>;

/// User-supplied override for the credential refresh procedure, in place of the
/// built-in HTTP POST to `refresh_endpoint`.
pub type RefreshCallback =
    Arc<dyn Fn(Value) -> futures_boxed::BoxFuture<'static, RefreshOutcome> + Send + Sync>;

/// User-supplied override for the private-channel authorization procedure, in place
/// of the built-in HTTP POST to `auth_endpoint`.
pub type AuthCallback =
    Arc<dyn Fn(Value) -> futures_boxed::BoxFuture<'static, AuthOutcome> + Send + Sync>;

/// Observer invoked whenever the transport closes, before the reconnect decision.
pub type TransportCloseObserver = Arc<dyn Fn(Option<u16>, &str) + Send + Sync>;

/// A minimal boxed-future alias so `Config` doesn't need to depend on `futures`
/// for a single type. Mirrors the shape `futures::future::BoxFuture` would give.
pub mod futures_boxed {
    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

/// Session configuration.
///
/// Defaults match the protocol spec exactly: 1000ms retry base, 20000ms retry cap,
/// 5000ms per-call timeout, resubscribe-on-reconnect enabled, pings enabled at a
/// 30000ms interval with a 5000ms pong wait, and `$` as the private-channel prefix.
#[derive(Clone)]
pub struct Config {
    /// Base reconnect delay in milliseconds.
    pub retry_base_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub retry_cap_ms: u64,
    /// Per-call (rpc/subscribe/ping) timeout in milliseconds.
    pub timeout_ms: u64,
    /// Whether a lost subscription is resubscribed automatically on reconnect.
    pub resubscribe: bool,
    /// Whether the heartbeat watchdog is active.
    pub ping_enabled: bool,
    /// Heartbeat PING interval in milliseconds.
    pub ping_interval_ms: u64,
    /// How long to wait for a PONG (or any inbound frame) before disconnecting.
    pub pong_wait_ms: u64,
    /// Channel name prefix that marks a channel as requiring authorization.
    pub private_channel_prefix: String,

    /// Credential refresh HTTP endpoint (used unless `on_refresh` is set).
    pub refresh_endpoint: Option<String>,
    pub refresh_headers: HashMap<String, String>,
    pub refresh_params: HashMap<String, String>,
    pub refresh_body: Value,
    /// `None` = unbounded retries. `Some(0)` disables refresh entirely.
    pub refresh_attempts: Option<u32>,
    pub refresh_retry_base_ms: u64,
    pub on_refresh: Option<RefreshCallback>,
    pub on_refresh_failed: Option<Arc<dyn Fn() + Send + Sync>>,

    /// Private-channel authorization HTTP endpoint (used unless `on_auth` is set).
    pub auth_endpoint: Option<String>,
    pub auth_headers: HashMap<String, String>,
    pub auth_params: HashMap<String, String>,
    pub on_auth: Option<AuthCallback>,

    pub on_transport_close: Option<TransportCloseObserver>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_base_ms: 1_000,
            retry_cap_ms: 20_000,
            timeout_ms: 5_000,
            resubscribe: true,
            ping_enabled: true,
            ping_interval_ms: 30_000,
            pong_wait_ms: 5_000,
            private_channel_prefix: "$".to_string(),

            refresh_endpoint: None,
            refresh_headers: HashMap::new(),
            refresh_params: HashMap::new(),
            refresh_body: Value::Null,
            refresh_attempts: None,
            refresh_retry_base_ms: 3_000,
            on_refresh: None,
            on_refresh_failed: None,

            auth_endpoint: None,
            auth_headers: HashMap::new(),
            auth_params: HashMap::new(),
            on_auth: None,

            on_transport_close: None,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn is_private_channel(&self, channel: &str) -> bool {
        channel.starts_with(self.private_channel_prefix.as_str())
    }

    /// Whether refresh is disabled by an explicit `refresh_attempts = Some(0)`.
    pub fn refresh_disabled(&self) -> bool {
        matches!(self.refresh_attempts, Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let c = Config::default();
        assert_eq!(c.retry_base_ms, 1_000);
        assert_eq!(c.retry_cap_ms, 20_000);
        assert_eq!(c.timeout_ms, 5_000);
        assert!(c.resubscribe);
        assert!(c.ping_enabled);
        assert_eq!(c.ping_interval_ms, 30_000);
        assert_eq!(c.pong_wait_ms, 5_000);
        assert_eq!(c.private_channel_prefix, "$");
        assert_eq!(c.refresh_attempts, None);
        assert!(!c.refresh_disabled());
    }

    #[test]
    fn test_refresh_attempts_zero_disables() {
        let mut c = Config::default();
        c.refresh_attempts = Some(0);
        assert!(c.refresh_disabled());
    }

    #[test]
    fn test_is_private_channel() {
        let c = Config::default();
        assert!(c.is_private_channel("$news"));
        assert!(!c.is_private_channel("news"));
    }
}
