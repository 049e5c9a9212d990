//! Unified SDK error types.

use thiserror::Error;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Timeout")]
    Timeout,

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// WebSocket / session-protocol errors.
///
/// Covers transport-level failures as well as the protocol-level error kinds the
/// session spec names: a per-call timeout, a disconnect racing a pending call, expired
/// credentials, exhausted refresh attempts, failed private-channel authorization, and
/// a verbatim server-supplied `{code, message}`.
#[derive(Error, Debug, Clone)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },

    /// No compiled-in transport matches the requested URL scheme.
    #[error("transport unavailable for url scheme")]
    TransportUnavailable,

    /// Per-call deadline exceeded. Code 0, message `"timeout"` on the wire.
    #[error("timeout")]
    Timeout,

    /// Transport was lost while a call was pending a reply.
    #[error("disconnected")]
    Disconnected,

    /// Credentials reported expired by the server; a refresh is in flight.
    #[error("credentials expired")]
    Expired,

    /// Refresh attempts were exhausted; the session is terminally disconnected.
    #[error("refresh failed")]
    RefreshFailed,

    /// Private-channel authorization request failed (HTTP or callback error).
    #[error("authorization request failed")]
    AuthorizationFailed,

    /// A server-supplied reply or push carried an explicit `{code, message}` error.
    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },
}
