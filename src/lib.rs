//! # Real-time session SDK
//!
//! A command/reply/push session client over a pub/sub/RPC protocol: one connection
//! at a time, multiplexed calls, per-channel subscriptions with recovery, optional
//! batching, a heartbeat watchdog, and a credential refresh loop.
//!
//! ## Architecture
//!
//! The SDK is organized in layers:
//!
//! 1. **Wire** — [`codec`] translates commands/replies/pushes to/from frames (JSON
//!    or length-delimited binary); [`transport`] carries frames over a native
//!    WebSocket or HTTP long-poll connection.
//! 2. **Protocol state** — [`multiplexer`] correlates replies to pending calls,
//!    [`subscription`] runs the per-channel state machine, [`batch`] buffers
//!    outbound commands, [`auth`] batches private-channel authorization,
//!    [`reconnect`] computes backoff delays, [`refresh`] runs the credential
//!    refresh procedure.
//! 3. **Facade** — [`session::Session`] owns a background task tying all of the
//!    above together and exposes the public connect/subscribe/rpc/send API.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use realtime_client::prelude::*;
//!
//! let mut session = Session::new("wss://example.com/connection", Config::default())?;
//! session.connect().await?;
//! let sub = session.subscribe("news", SubscriptionHandlers::new().on_publish(|p| {
//!     println!("{:?}", p.data);
//! }))?;
//! let reply = session.rpc(serde_json::json!({"method": "ping"})).await?;
//! ```

// ── Core ─────────────────────────────────────────────────────────────────────

/// Unified SDK error types.
pub mod error;

/// Session configuration.
pub mod config;

// ── Wire layer ───────────────────────────────────────────────────────────────

/// Wire codec: commands/replies/pushes to/from frames (JSON, binary).
pub mod codec;

/// Transport adapters: native WebSocket, WASM WebSocket, HTTP long-polling.
pub mod transport;

/// Generic HTTP side-channel client (credential refresh, private-channel auth).
#[cfg(feature = "http")]
pub mod http;

/// HTTP retry policy, shared by the refresh and auth side-channels.
pub mod retry;

// ── Protocol state ───────────────────────────────────────────────────────────

/// Command multiplexer: ID assignment, pending-reply table, timeout racing.
pub mod multiplexer;

/// Outbound batching buffer.
pub mod batch;

/// Private-channel authorization batching.
pub mod auth;

/// Reconnection backoff.
pub mod reconnect;

/// Credential refresh loop.
pub mod refresh;

/// Subscription registry and per-channel state machine.
pub mod subscription;

/// Session- and subscription-scoped events.
pub mod events;

// ── Facade ───────────────────────────────────────────────────────────────────

/// Session facade and its background task.
pub mod session;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{HttpError, SdkError, WsError};
    pub use crate::events::{
        JoinLeaveInfo, Publication, SessionEvent, SubscriptionEvent, SubscriptionHandlers,
    };
    pub use crate::session::{Session, SubscriptionHandle};

    #[cfg(feature = "http")]
    pub use crate::retry::{RetryConfig, RetryPolicy};
}
