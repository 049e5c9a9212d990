//! Integration tests for the session facade.
//!
//! These tests connect to a live server and exercise the full
//! connect → subscribe → receive → unsubscribe → disconnect lifecycle.
//!
//! All tests are `#[ignore]` because they require network access.
//!
//! Run with:
//! ```bash
//! cargo test -p realtime-client --features ws-native --test session_integration -- --ignored
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::timeout;

use realtime_client::prelude::*;
use realtime_client::events::SubscriptionHandlers;

const WS_URL: &str = "wss://realtime.example.com/connection/websocket";
const TEST_CHANNEL: &str = "news";
const TEST_TIMEOUT: Duration = Duration::from_secs(15);

async fn connected_session() -> Session {
    let mut session = Session::new(WS_URL, Config::default()).expect("valid url");
    session.connect().await.expect("connect should succeed");
    wait_for_connect(&session).await;
    session
}

async fn wait_for_connect(session: &Session) {
    let events = session.events();
    tokio::pin!(events);

    let first = timeout(TEST_TIMEOUT, events.next())
        .await
        .expect("timed out waiting for Connect")
        .expect("event stream ended");

    assert!(matches!(first, SessionEvent::Connect { .. }), "first event should be Connect, got: {first:?}");
}

async fn next_matching(session: &Session, predicate: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    let events = session.events();
    tokio::pin!(events);

    timeout(TEST_TIMEOUT, async {
        while let Some(ev) = events.next().await {
            if predicate(&ev) {
                return ev;
            }
        }
        panic!("event stream ended without a matching event");
    })
    .await
    .expect("timed out waiting for matching event")
}

#[tokio::test]
#[ignore]
async fn connect_and_receive_connect_event() {
    let mut session = connected_session().await;
    assert!(session.is_connected());
    session.disconnect().await.expect("disconnect should succeed");
}

#[tokio::test]
#[ignore]
async fn ping_round_trip() {
    let session = connected_session().await;
    session.ping().await.expect("ping should succeed");
}

#[tokio::test]
#[ignore]
async fn rpc_round_trip() {
    let session = connected_session().await;
    let reply = session
        .rpc(serde_json::json!({"method": "echo", "params": {"hello": "world"}}))
        .await
        .expect("rpc should succeed");
    assert!(reply.is_object() || reply.is_null());
}

#[tokio::test]
#[ignore]
async fn subscribe_receives_publication() {
    let session = connected_session().await;

    let sub = session
        .subscribe(TEST_CHANNEL, SubscriptionHandlers::new())
        .expect("subscribe should succeed");
    assert_eq!(sub.channel(), TEST_CHANNEL);

    let event = next_matching(&session, |ev| matches!(ev, SessionEvent::Message(_))).await;
    assert!(matches!(event, SessionEvent::Message(_)));
}

#[tokio::test]
#[ignore]
async fn subscribe_and_unsubscribe() {
    let session = connected_session().await;

    let sub = session
        .subscribe(TEST_CHANNEL, SubscriptionHandlers::new())
        .expect("subscribe should succeed");

    sub.unsubscribe().expect("unsubscribe should succeed");

    // The session should stay alive and answer pings after unsubscribing.
    session.ping().await.expect("ping after unsubscribe should succeed");
}

#[tokio::test]
#[ignore]
async fn graceful_disconnect() {
    let mut session = connected_session().await;
    assert!(session.is_connected());

    session.disconnect().await.expect("disconnect should succeed");
    assert!(!session.is_connected());
}

#[tokio::test]
#[ignore]
async fn batching_defers_commands_until_flush() {
    let session = connected_session().await;

    session.start_batching().expect("start batching");
    session.send(serde_json::json!({"hello": 1})).expect("queue send");
    session.send(serde_json::json!({"hello": 2})).expect("queue send");
    session.flush().expect("flush batch");

    session.ping().await.expect("ping after flush should succeed");
}
