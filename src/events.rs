//! Session- and subscription-scoped events.
//!
//! The "observer pattern: event name → list of handlers" design note is rendered as a
//! struct of optional boxed closures rather than a runtime string-keyed map — the event
//! set is fixed and known at compile time, so named fields are the idiomatic fit.

use std::fmt;

use serde_json::Value;

use crate::codec::ReplyError;

/// Session-scoped events, delivered via `Session::events()`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connect { client: String, transport: String, latency: std::time::Duration, data: Option<Value> },
    Disconnect { reason: String, reconnect: bool },
    Message(Value),
}

/// A received publication.
#[derive(Debug, Clone)]
pub struct Publication {
    pub uid: Option<String>,
    pub data: Value,
    pub info: Option<Value>,
}

/// Join/leave presence info carried by a `join`/`leave` push.
#[derive(Debug, Clone)]
pub struct JoinLeaveInfo {
    pub client: Option<String>,
    pub user: Option<String>,
    pub info: Option<Value>,
}

/// Subscription-scoped events, delivered via the [`SubscriptionHandlers`] the caller
/// registered with `Session::subscribe`.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Subscribe { recovered: bool },
    Error(ReplyError),
    Unsubscribe,
    Publish(Publication),
    Join(JoinLeaveInfo),
    Leave(JoinLeaveInfo),
}

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

/// Per-channel callback set. Every field is optional; an unset handler silently
/// drops the corresponding event.
#[derive(Default)]
pub struct SubscriptionHandlers {
    pub on_subscribe: Option<Handler<bool>>,
    pub on_error: Option<Handler<ReplyError>>,
    pub on_unsubscribe: Option<Handler<()>>,
    pub on_publish: Option<Handler<Publication>>,
    pub on_join: Option<Handler<JoinLeaveInfo>>,
    pub on_leave: Option<Handler<JoinLeaveInfo>>,
}

impl fmt::Debug for SubscriptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandlers")
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_unsubscribe", &self.on_unsubscribe.is_some())
            .field("on_publish", &self.on_publish.is_some())
            .field("on_join", &self.on_join.is_some())
            .field("on_leave", &self.on_leave.is_some())
            .finish()
    }
}

impl SubscriptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_subscribe(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_subscribe = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ReplyError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_unsubscribe(mut self, f: impl Fn(()) + Send + Sync + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(f));
        self
    }

    pub fn on_publish(mut self, f: impl Fn(Publication) + Send + Sync + 'static) -> Self {
        self.on_publish = Some(Box::new(f));
        self
    }

    pub fn on_join(mut self, f: impl Fn(JoinLeaveInfo) + Send + Sync + 'static) -> Self {
        self.on_join = Some(Box::new(f));
        self
    }

    pub fn on_leave(mut self, f: impl Fn(JoinLeaveInfo) + Send + Sync + 'static) -> Self {
        self.on_leave = Some(Box::new(f));
        self
    }

    /// Dispatches one event to the matching handler, if registered.
    pub fn dispatch(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Subscribe { recovered } => {
                if let Some(f) = &self.on_subscribe {
                    f(recovered);
                }
            }
            SubscriptionEvent::Error(e) => {
                if let Some(f) = &self.on_error {
                    f(e);
                }
            }
            SubscriptionEvent::Unsubscribe => {
                if let Some(f) = &self.on_unsubscribe {
                    f(());
                }
            }
            SubscriptionEvent::Publish(p) => {
                if let Some(f) = &self.on_publish {
                    f(p);
                }
            }
            SubscriptionEvent::Join(j) => {
                if let Some(f) = &self.on_join {
                    f(j);
                }
            }
            SubscriptionEvent::Leave(l) => {
                if let Some(f) = &self.on_leave {
                    f(l);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispatch_calls_matching_handler_only() {
        let publish_called = Arc::new(AtomicBool::new(false));
        let error_called = Arc::new(AtomicBool::new(false));
        let p = publish_called.clone();
        let e = error_called.clone();

        let handlers = SubscriptionHandlers::new()
            .on_publish(move |_| p.store(true, Ordering::SeqCst))
            .on_error(move |_| e.store(true, Ordering::SeqCst));

        handlers.dispatch(SubscriptionEvent::Publish(Publication { uid: None, data: Value::Null, info: None }));

        assert!(publish_called.load(Ordering::SeqCst));
        assert!(!error_called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unset_handler_is_noop() {
        let handlers = SubscriptionHandlers::new();
        handlers.dispatch(SubscriptionEvent::Unsubscribe);
    }
}
