//! Subscription registry and per-channel state machine.
//!
//! Generalizes the teacher's `active_subscriptions: Vec<SubscribeParams>` — which only
//! tracked channel membership for blind resubscribe-on-reconnect — into a full
//! per-channel state machine with last-seen-UID recovery and user-facing events.
//! Owned exclusively by the session's background task, same as the teacher's
//! `TaskState` fields.

use std::collections::HashMap;

use crate::codec::ReplyError;
use crate::events::{JoinLeaveInfo, Publication, SubscriptionEvent, SubscriptionHandlers};

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Subscribing,
    Subscribed,
    Unsubscribed,
    Error,
}

/// One channel's subscription record.
pub struct SubscriptionEntry {
    pub channel: String,
    pub state: State,
    pub last_error: Option<ReplyError>,
    pub handlers: SubscriptionHandlers,
    /// `false` once the user has explicitly unsubscribed; a transport loss then
    /// discards rather than resubscribes this channel.
    pub should_resubscribe: bool,
}

impl SubscriptionEntry {
    fn new(channel: String, handlers: SubscriptionHandlers) -> Self {
        Self { channel, state: State::New, last_error: None, handlers, should_resubscribe: true }
    }
}

/// The registry of all known subscriptions plus the last-seen-publication map used
/// for recovery.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, SubscriptionEntry>,
    last_seen: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), last_seen: HashMap::new() }
    }

    pub fn get(&self, channel: &str) -> Option<&SubscriptionEntry> {
        self.entries.get(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.entries.contains_key(channel)
    }

    pub fn last_seen(&self, channel: &str) -> Option<&str> {
        self.last_seen.get(channel).map(String::as_str)
    }

    /// Registers a new subscription request, reusing an existing entry (and updating
    /// its handlers) if the channel is already tracked — per §6, `subscribe()` reuses
    /// an existing `Subscription` for the channel rather than erroring.
    pub fn request_subscribe(&mut self, channel: &str, handlers: SubscriptionHandlers) -> &mut SubscriptionEntry {
        let entry = self
            .entries
            .entry(channel.to_string())
            .or_insert_with(|| SubscriptionEntry::new(channel.to_string(), SubscriptionHandlers::new()));
        entry.handlers = handlers;
        entry.should_resubscribe = true;
        if matches!(entry.state, State::Unsubscribed) {
            entry.state = State::New;
        }
        entry
    }

    /// Transitions every channel in `New` or `Unsubscribed`-but-requested state into
    /// `Subscribing`, returning the channels that need a SUBSCRIBE command sent
    /// (carrying recovery fields for any with a known last-seen UID).
    pub fn begin_subscribing_all_new(&mut self) -> Vec<(String, Option<String>)> {
        let mut out = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.state == State::New {
                entry.state = State::Subscribing;
                out.push((entry.channel.clone(), self.last_seen.get(&entry.channel).cloned()));
            }
        }
        out
    }

    /// Delivers missed publications in chronological order (the wire gives them
    /// newest-first) and marks the subscription `Subscribed`, emitting `subscribe`.
    pub fn mark_subscribed(&mut self, channel: &str, recovered: bool, publications_newest_first: Vec<Publication>) {
        let Some(entry) = self.entries.get_mut(channel) else { return };
        entry.state = State::Subscribed;
        entry.last_error = None;

        for publication in publications_newest_first.into_iter().rev() {
            if let Some(uid) = &publication.uid {
                self.last_seen.insert(channel.to_string(), uid.clone());
            }
            entry.handlers.dispatch(SubscriptionEvent::Publish(publication));
        }

        entry.handlers.dispatch(SubscriptionEvent::Subscribe { recovered });
    }

    /// Updates the last-seen UID without emitting any event — used when a SUBSCRIBE
    /// reply omits `publications` but carries a bare `last`.
    pub fn update_last_seen(&mut self, channel: &str, last: String) {
        self.last_seen.insert(channel.to_string(), last);
    }

    /// Marks a channel `Error` and dispatches the error to its handlers. Used both
    /// for an error-carrying SUBSCRIBE reply and an auth-batch failure — the
    /// subscription state machine treats them identically.
    pub fn fail_subscription(&mut self, channel: &str, error: ReplyError) {
        let Some(entry) = self.entries.get_mut(channel) else { return };
        entry.state = State::Error;
        entry.last_error = Some(error.clone());
        entry.handlers.dispatch(SubscriptionEvent::Error(error));
    }

    /// Delivers a live publication push (not part of subscribe recovery).
    pub fn deliver_publish(&mut self, channel: &str, publication: Publication) {
        if let Some(uid) = &publication.uid {
            self.last_seen.insert(channel.to_string(), uid.clone());
        }
        if let Some(entry) = self.entries.get_mut(channel) {
            entry.handlers.dispatch(SubscriptionEvent::Publish(publication));
        }
    }

    pub fn deliver_join(&mut self, channel: &str, info: JoinLeaveInfo) {
        if let Some(entry) = self.entries.get_mut(channel) {
            entry.handlers.dispatch(SubscriptionEvent::Join(info));
        }
    }

    pub fn deliver_leave(&mut self, channel: &str, info: JoinLeaveInfo) {
        if let Some(entry) = self.entries.get_mut(channel) {
            entry.handlers.dispatch(SubscriptionEvent::Leave(info));
        }
    }

    /// User-initiated unsubscribe: clears `should_resubscribe`, transitions to
    /// `Unsubscribed`, emits `unsubscribe`. Returns `true` if the channel was known
    /// (so the caller knows whether to send an UNSUBSCRIBE command).
    pub fn request_unsubscribe(&mut self, channel: &str) -> bool {
        let Some(entry) = self.entries.get_mut(channel) else { return false };
        entry.should_resubscribe = false;
        entry.state = State::Unsubscribed;
        entry.handlers.dispatch(SubscriptionEvent::Unsubscribe);
        true
    }

    /// Transport was lost. Every `Subscribed` channel either goes back to
    /// `Subscribing` (if `should_resubscribe`) or is discarded entirely (entry and
    /// last-seen UID removed). A channel still in `Subscribing` — its SUBSCRIBE was
    /// sent but no reply arrived before the transport dropped — resets to `New` so the
    /// next `begin_subscribing_all_new` pass resends it rather than leaving it stuck.
    /// Returns the channels that will be resubscribed.
    pub fn on_transport_lost(&mut self) -> Vec<String> {
        let mut to_resubscribe = Vec::new();
        let mut to_discard = Vec::new();

        for entry in self.entries.values_mut() {
            match entry.state {
                State::Subscribed => {
                    if entry.should_resubscribe {
                        entry.state = State::Subscribing;
                        entry.handlers.dispatch(SubscriptionEvent::Unsubscribe);
                        to_resubscribe.push(entry.channel.clone());
                    } else {
                        entry.state = State::Unsubscribed;
                        to_discard.push(entry.channel.clone());
                    }
                }
                State::Subscribing => {
                    if entry.should_resubscribe {
                        entry.state = State::New;
                    } else {
                        entry.state = State::Unsubscribed;
                        to_discard.push(entry.channel.clone());
                    }
                }
                _ => {}
            }
        }

        for channel in &to_discard {
            self.entries.remove(channel);
            self.last_seen.remove(channel);
        }

        to_resubscribe
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_subscribe_creates_new_entry() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        assert_eq!(registry.get("news").unwrap().state, State::New);
    }

    #[test]
    fn test_request_subscribe_reuses_existing_entry() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        registry.mark_subscribed("news", false, Vec::new());
        assert_eq!(registry.get("news").unwrap().state, State::Subscribed);

        registry.request_subscribe("news", SubscriptionHandlers::new());
        // Re-requesting a subscribed channel does not reset its live state.
        assert_eq!(registry.get("news").unwrap().state, State::Subscribed);
    }

    #[test]
    fn test_begin_subscribing_all_new_transitions_and_carries_last_seen() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.update_last_seen("news", "uid-1".into());
        let pending = registry.begin_subscribing_all_new();
        assert_eq!(pending, vec![("news".to_string(), Some("uid-1".to_string()))]);
        assert_eq!(registry.get("news").unwrap().state, State::Subscribing);
    }

    #[test]
    fn test_mark_subscribed_delivers_publications_in_chronological_order() {
        let mut registry = Registry::new();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let o = order.clone();
        let handlers = SubscriptionHandlers::new().on_publish(move |p| o.lock().unwrap().push(p.uid.unwrap()));
        registry.request_subscribe("news", handlers);
        registry.begin_subscribing_all_new();

        // Wire order is newest-first: uid-3, uid-2, uid-1.
        let publications = vec![
            Publication { uid: Some("uid-3".into()), data: serde_json::Value::Null, info: None },
            Publication { uid: Some("uid-2".into()), data: serde_json::Value::Null, info: None },
            Publication { uid: Some("uid-1".into()), data: serde_json::Value::Null, info: None },
        ];
        registry.mark_subscribed("news", true, publications);

        assert_eq!(*order.lock().unwrap(), vec!["uid-1", "uid-2", "uid-3"]);
        assert_eq!(registry.last_seen("news"), Some("uid-3"));
    }

    #[test]
    fn test_fail_subscription_sets_error_state() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        registry.fail_subscription("news", ReplyError { code: 100, message: "denied".into() });
        assert_eq!(registry.get("news").unwrap().state, State::Error);
    }

    #[test]
    fn test_request_unsubscribe_clears_resubscribe_flag() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        assert!(registry.request_unsubscribe("news"));
        let entry = registry.get("news").unwrap();
        assert_eq!(entry.state, State::Unsubscribed);
        assert!(!entry.should_resubscribe);
    }

    #[test]
    fn test_request_unsubscribe_unknown_channel_returns_false() {
        let mut registry = Registry::new();
        assert!(!registry.request_unsubscribe("ghost"));
    }

    #[test]
    fn test_on_transport_lost_resubscribes_by_default() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        registry.mark_subscribed("news", false, Vec::new());

        let to_resubscribe = registry.on_transport_lost();
        assert_eq!(to_resubscribe, vec!["news".to_string()]);
        assert_eq!(registry.get("news").unwrap().state, State::Subscribing);
    }

    #[test]
    fn test_on_transport_lost_resets_subscribing_to_new() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        assert_eq!(registry.get("news").unwrap().state, State::Subscribing);

        let to_resubscribe = registry.on_transport_lost();
        assert!(to_resubscribe.is_empty());
        assert_eq!(registry.get("news").unwrap().state, State::New);

        // The next pass picks it back up.
        let pending = registry.begin_subscribing_all_new();
        assert_eq!(pending, vec![("news".to_string(), None)]);
    }

    #[test]
    fn test_on_transport_lost_discards_subscribing_when_resubscribe_disabled() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        if let Some(entry) = registry.entries.get_mut("news") {
            entry.should_resubscribe = false;
        }

        let to_resubscribe = registry.on_transport_lost();
        assert!(to_resubscribe.is_empty());
        assert!(registry.get("news").is_none());
    }

    #[test]
    fn test_on_transport_lost_discards_when_resubscribe_disabled() {
        let mut registry = Registry::new();
        registry.request_subscribe("news", SubscriptionHandlers::new());
        registry.begin_subscribing_all_new();
        registry.mark_subscribed("news", false, Vec::new());
        registry.get("news"); // sanity
        if let Some(entry) = registry.entries.get_mut("news") {
            entry.should_resubscribe = false;
        }

        let to_resubscribe = registry.on_transport_lost();
        assert!(to_resubscribe.is_empty());
        assert!(registry.get("news").is_none());
        assert!(registry.last_seen("news").is_none());
    }
}
