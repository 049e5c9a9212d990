//! Command multiplexer — monotonic ID assignment, pending-reply table, per-call
//! timeout racing.
//!
//! Owned exclusively by the session's background task (§5's single-threaded
//! cooperative model), so no internal locking is needed; `Multiplexer` is plain
//! `&mut self` state, mirroring the teacher's `TaskState` ownership of its own tables.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::Reply;
use crate::error::{SdkError, WsError};

/// One outstanding call awaiting a reply.
struct PendingCall {
    tx: oneshot::Sender<Result<Value, SdkError>>,
}

/// Assigns monotonic command IDs and tracks pending replies.
#[derive(Default)]
pub struct Multiplexer {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self { next_id: 1, pending: HashMap::new() }
    }

    /// Assigns the next monotonic ID and registers a pending-reply slot for it,
    /// returning the ID and a receiver that resolves when the reply arrives (or the
    /// entry is dropped by [`Multiplexer::fail_all`]).
    pub fn begin_call(&mut self) -> (u64, oneshot::Receiver<Result<Value, SdkError>>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, PendingCall { tx });
        (id, rx)
    }

    /// Evicts a pending entry without resolving it (used after the timeout race loses,
    /// so a later stale reply finds no entry and is silently dropped).
    pub fn evict(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Dispatches an inbound reply to its pending call, if one is still registered.
    /// Returns `true` if a pending call was resolved, `false` if the ID was stale
    /// (already timed out, or never issued by this session).
    pub fn dispatch_reply(&mut self, reply: &Reply) -> bool {
        let Some(pending) = self.pending.remove(&reply.id) else {
            return false;
        };
        let _ = pending.tx.send(reply_to_result(reply));
        true
    }

    /// Resolves every pending call with `Disconnected` and clears the table — called
    /// when the transport is lost.
    pub fn fail_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(SdkError::Ws(WsError::Disconnected)));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Converts an inbound reply into the `Result` a pending call resolves with: a
/// code-0/message-`"timeout"` error maps to `WsError::Timeout`, any other error to
/// `WsError::Server`, and a missing `result` to `Value::Null`.
pub fn reply_to_result(reply: &Reply) -> Result<Value, SdkError> {
    match &reply.error {
        Some(e) if e.is_timeout() => Err(SdkError::Ws(WsError::Timeout)),
        Some(e) => Err(SdkError::Ws(WsError::Server { code: e.code, message: e.message.clone() })),
        None => Ok(reply.result.clone().unwrap_or(Value::Null)),
    }
}

/// Races a pending call's receiver against the per-call timeout. On timeout, the
/// caller is responsible for evicting the entry from the `Multiplexer` (it does not
/// have `&mut Multiplexer` access itself, since the multiplexer is owned by the
/// session task while this future may be awaited by the public API).
pub async fn await_reply(
    rx: oneshot::Receiver<Result<Value, SdkError>>,
    timeout: Duration,
) -> Result<Value, SdkError> {
    tokio::select! {
        result = rx => result.unwrap_or(Err(SdkError::Ws(WsError::Disconnected))),
        _ = tokio::time::sleep(timeout) => Err(SdkError::Ws(WsError::Timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReplyError;

    #[test]
    fn test_begin_call_assigns_monotonic_ids() {
        let mut mux = Multiplexer::new();
        let (id1, _) = mux.begin_call();
        let (id2, _) = mux.begin_call();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(mux.pending_count(), 2);
    }

    #[test]
    fn test_dispatch_reply_resolves_and_removes() {
        let mut mux = Multiplexer::new();
        let (id, _rx) = mux.begin_call();
        let resolved = mux.dispatch_reply(&Reply { id, result: Some(serde_json::json!({"ok": true})), error: None });
        assert!(resolved);
        assert_eq!(mux.pending_count(), 0);
    }

    #[test]
    fn test_dispatch_reply_stale_id_returns_false() {
        let mut mux = Multiplexer::new();
        let resolved = mux.dispatch_reply(&Reply { id: 999, result: None, error: None });
        assert!(!resolved);
    }

    #[tokio::test]
    async fn test_dispatch_reply_error_propagates_server_error() {
        let mut mux = Multiplexer::new();
        let (id, rx) = mux.begin_call();
        mux.dispatch_reply(&Reply {
            id,
            result: None,
            error: Some(ReplyError { code: 100, message: "bad request".into() }),
        });
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(SdkError::Ws(WsError::Server { code: 100, .. }))));
    }

    #[tokio::test]
    async fn test_dispatch_reply_timeout_error_maps_to_ws_timeout() {
        let mut mux = Multiplexer::new();
        let (id, rx) = mux.begin_call();
        mux.dispatch_reply(&Reply {
            id,
            result: None,
            error: Some(ReplyError { code: 0, message: "timeout".into() }),
        });
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(SdkError::Ws(WsError::Timeout))));
    }

    #[test]
    fn test_fail_all_resolves_all_pending_with_disconnected() {
        let mut mux = Multiplexer::new();
        let (_id1, rx1) = mux.begin_call();
        let (_id2, rx2) = mux.begin_call();
        mux.fail_all();
        assert_eq!(mux.pending_count(), 0);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_await_reply_resolves_before_timeout() {
        let mut mux = Multiplexer::new();
        let (id, rx) = mux.begin_call();
        mux.dispatch_reply(&Reply { id, result: Some(serde_json::json!(42)), error: None });
        let result = await_reply(rx, Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_await_reply_times_out() {
        let mut mux = Multiplexer::new();
        let (_id, rx) = mux.begin_call();
        let result = await_reply(rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(SdkError::Ws(WsError::Timeout))));
        mux.evict(_id);
    }
}
