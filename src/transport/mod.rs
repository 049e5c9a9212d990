//! Transport adapter — wraps the native message socket, the WASM message socket, and
//! an HTTP long-polling fallback behind a uniform event surface.
//!
//! Unlike the teacher's `ws::native`/`ws::wasm`, reconnection and backoff are NOT a
//! transport concern here — the protocol spec places "Reconnection and backoff
//! controller" as its own session-level component (§2 item 7), separate from
//! "Transport adapter" (§2 item 2). A transport here represents one connection
//! attempt/session: it connects once, emits events until it closes, and is dropped;
//! the session's background task owns the retry loop and constructs a fresh transport
//! per attempt.

#[cfg(feature = "ws-native")]
pub mod native;

#[cfg(feature = "ws-wasm")]
pub mod wasm;

#[cfg(feature = "http")]
pub mod polling;

use crate::codec::Frame;

/// Events exposed by every transport implementation.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(Frame),
    /// A successful liveness check that carried no frame — e.g. an empty-body
    /// long-poll response. Resets the session's pong watchdog the same as a
    /// `Message` would, without being handed to the codec.
    Heartbeat,
    Error(String),
    Close(CloseReason),
}

/// The reason a transport closed, and whether the session should attempt to
/// reconnect.
///
/// Mirrors the spec: `close.reason` may arrive as a structured `{reason, reconnect}`
/// object or as a plain string, in which case `reconnect = reason != "disconnect"`.
#[derive(Debug, Clone)]
pub enum CloseReason {
    Structured { reason: String, reconnect: bool },
    Plain(String),
}

impl CloseReason {
    pub fn plain(reason: impl Into<String>) -> Self {
        CloseReason::Plain(reason.into())
    }

    pub fn structured(reason: impl Into<String>, reconnect: bool) -> Self {
        CloseReason::Structured { reason: reason.into(), reconnect }
    }

    pub fn reconnect_hint(&self) -> bool {
        match self {
            CloseReason::Structured { reconnect, .. } => *reconnect,
            CloseReason::Plain(s) => s != "disconnect",
        }
    }

    pub fn reason_str(&self) -> &str {
        match self {
            CloseReason::Structured { reason, .. } => reason,
            CloseReason::Plain(s) => s,
        }
    }
}

/// Which concrete transport a URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    NativeWs,
    WasmWs,
    Polling,
}

/// Whether the URL's `format=protobuf` query parameter selects the binary codec.
pub fn wants_binary_format(url: &str) -> bool {
    url.contains("format=protobuf")
}

/// Classify a URL into the transport it selects, per the spec's URL conventions:
/// `ws`/`wss` → message socket (native or WASM, by target), `http`/`https` → polling.
pub fn classify_url(url: &str) -> Option<TransportKind> {
    let scheme_end = url.find("://")?;
    let scheme = &url[..scheme_end];
    match scheme {
        "ws" | "wss" => {
            if cfg!(target_arch = "wasm32") {
                Some(TransportKind::WasmWs)
            } else {
                Some(TransportKind::NativeWs)
            }
        }
        "http" | "https" => Some(TransportKind::Polling),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_url_ws() {
        assert_ne!(classify_url("ws://localhost:8000/connection"), None);
        assert_ne!(classify_url("wss://example.com/ws"), None);
    }

    #[test]
    fn test_classify_url_http_is_polling() {
        assert_eq!(classify_url("http://localhost:8000/poll"), Some(TransportKind::Polling));
        assert_eq!(classify_url("https://example.com/poll"), Some(TransportKind::Polling));
    }

    #[test]
    fn test_classify_url_unknown_scheme() {
        assert_eq!(classify_url("ftp://example.com"), None);
    }

    #[test]
    fn test_wants_binary_format() {
        assert!(wants_binary_format("ws://host/ws?format=protobuf"));
        assert!(!wants_binary_format("ws://host/ws"));
    }

    #[test]
    fn test_close_reason_reconnect_hint() {
        let plain = CloseReason::plain("disconnect");
        assert!(!plain.reconnect_hint());
        let plain2 = CloseReason::plain("server restart");
        assert!(plain2.reconnect_hint());
        let structured = CloseReason::structured("expired", false);
        assert!(!structured.reconnect_hint());
    }
}
