//! Session facade and its background task.
//!
//! One `tokio::spawn`ed task owns all mutable session state — the multiplexer, the
//! subscription registry, the batching buffers, the credential/refresh bookkeeping —
//! mirroring the teacher's single-task `TaskState` ownership in `ws::native::run_task`.
//! The public [`Session`] handle talks to that task over an `mpsc` command channel;
//! the only state shared across the boundary is `ready_state`, an
//! externally-observable cell in the same shape as the teacher's
//! `WsClient::ready_state: Arc<AtomicU16>`.
//!
//! The task's outer loop (`run_task`) is the teacher's `run_task`/`run_connected`
//! split: attempt a connection, hand it to `run_connected` for as long as it stays up,
//! and on disconnect decide whether to back off and retry or stop for good.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::{self, AuthBatch};
use crate::batch::Batch;
use crate::codec::{self, Codec, Command, Frame, Incoming, Method, Push, PushType, Reply, ReplyError};
use crate::config::Config;
use crate::error::{SdkError, WsError};
use crate::events::{JoinLeaveInfo, Publication, SessionEvent, SubscriptionEvent, SubscriptionHandlers};
use crate::http::HttpClient;
use crate::multiplexer::{self, Multiplexer};
use crate::reconnect;
use crate::refresh::{self, RefreshState};
use crate::subscription::{self, Registry};
use crate::transport::{self, CloseReason, TransportEvent, TransportKind};

#[cfg(feature = "ws-native")]
use crate::transport::native::NativeTransport;
#[cfg(feature = "http")]
use crate::transport::polling::PollingTransport;

/// Mirrors the teacher's `ws::ReadyState`, stored in `Session::ready_state` so the
/// public handle can answer `is_connected()` without a round trip to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

type Ack = oneshot::Sender<(u64, oneshot::Receiver<Result<Value, SdkError>>)>;

/// Commands sent from the public [`Session`]/[`SubscriptionHandle`] handles to the
/// background task.
enum SessionCommand {
    Rpc { data: Value, ack: Ack },
    Ping { ack: Ack },
    Send { data: Value },
    Subscribe { channel: String, handlers: SubscriptionHandlers },
    Unsubscribe { channel: String },
    StartBatching,
    StopBatching { flush: bool },
    Flush,
    StartAuthBatching,
    StopAuthBatching,
    SetCredentials(Value),
    SetConnectData(Value),
    /// A pending call's `await_reply` lost its timeout race; evict its stale entry
    /// from the multiplexer so a later straggling reply finds nothing to resolve.
    EvictCall(u64),
    Disconnect,
}

/// What an in-flight reply ID was issued for, routed here instead of through the
/// [`Multiplexer`]'s externally-awaited pending table — CONNECT/SUBSCRIBE/REFRESH/
/// UNSUBSCRIBE replies are acted on by the task itself, not handed back to a caller.
enum InternalPurpose {
    Connect,
    Refresh,
    Subscribe(String),
    Unsubscribe(String),
}

/// Why `run_connected` returned.
enum DisconnectReason {
    UserRequested,
    TransportClosed { reconnect: bool, reason: String },
    RefreshExhausted,
}

/// What processing one decoded inbound item requires of the outer select loop.
enum ItemOutcome {
    Continue,
    Disconnect(DisconnectReason),
    ArmRefresh(Duration),
    RefreshNow,
}

enum RefreshOutcome {
    Done,
    Retry(Duration),
    Terminal(DisconnectReason),
}

/// A handle returned by [`Session::subscribe`]/[`Session::get_sub`]. Holds a cheap,
/// non-owning `mpsc::Sender` clone plus the channel name — never a reference back to
/// the `Session` itself, per the facade's no-ambient-globals rule.
pub struct SubscriptionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    channel: String,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn unsubscribe(&self) -> Result<(), SdkError> {
        send_try(&self.cmd_tx, SessionCommand::Unsubscribe { channel: self.channel.clone() })
    }
}

fn send_try(tx: &mpsc::Sender<SessionCommand>, cmd: SessionCommand) -> Result<(), SdkError> {
    tx.try_send(cmd).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => SdkError::Ws(WsError::SendFailed("command channel full".into())),
        mpsc::error::TrySendError::Closed(_) => SdkError::Ws(WsError::NotConnected),
    })
}

/// One connection attempt's transport, picked by URL scheme. Reconnection lives one
/// level up in [`run_task`]; a `SessionTransport` is dropped and rebuilt per attempt.
enum SessionTransport {
    #[cfg(feature = "ws-native")]
    Native(NativeTransport),
    #[cfg(feature = "http")]
    Polling(PollingTransport),
}

impl SessionTransport {
    async fn connect(kind: TransportKind, url: &str) -> Result<Self, WsError> {
        match kind {
            #[cfg(feature = "ws-native")]
            TransportKind::NativeWs => {
                let mut t = NativeTransport::new();
                t.connect(url).await?;
                Ok(Self::Native(t))
            }
            #[cfg(not(feature = "ws-native"))]
            TransportKind::NativeWs => Err(WsError::TransportUnavailable),

            TransportKind::WasmWs => Err(WsError::TransportUnavailable),

            #[cfg(feature = "http")]
            TransportKind::Polling => {
                let mut t = PollingTransport::new();
                t.connect(url).await?;
                Ok(Self::Polling(t))
            }
            #[cfg(not(feature = "http"))]
            TransportKind::Polling => Err(WsError::TransportUnavailable),
        }
    }

    fn send(&self, frame: Frame) -> Result<(), WsError> {
        match self {
            #[cfg(feature = "ws-native")]
            Self::Native(t) => t.send(frame),
            #[cfg(feature = "http")]
            Self::Polling(t) => t.send(frame),
        }
    }

    async fn close(&mut self) {
        match self {
            #[cfg(feature = "ws-native")]
            Self::Native(t) => t.close().await,
            #[cfg(feature = "http")]
            Self::Polling(t) => t.close().await,
        }
    }

    fn events(&self) -> Pin<Box<dyn futures_util::Stream<Item = TransportEvent> + Send + '_>> {
        match self {
            #[cfg(feature = "ws-native")]
            Self::Native(t) => t.events(),
            #[cfg(feature = "http")]
            Self::Polling(t) => t.events(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "ws-native")]
            Self::Native(_) => "websocket",
            #[cfg(feature = "http")]
            Self::Polling(_) => "polling",
        }
    }
}

fn transport_kind_available(kind: TransportKind) -> bool {
    match kind {
        TransportKind::NativeWs => cfg!(feature = "ws-native"),
        TransportKind::WasmWs => cfg!(feature = "ws-wasm"),
        TransportKind::Polling => cfg!(feature = "http"),
    }
}

fn pick_codec(url: &str) -> Box<dyn Codec> {
    if transport::wants_binary_format(url) {
        Box::new(codec::binary::BinaryCodec)
    } else {
        Box::new(codec::json::JsonCodec)
    }
}

/// All state owned exclusively by the background task — no locking, since nothing
/// else ever touches it. Mirrors the teacher's `TaskState`.
struct SessionState {
    config: Config,
    url: String,
    codec: Box<dyn Codec>,
    event_tx: mpsc::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    ready_state: Arc<AtomicU8>,
    known_channels: Arc<StdMutex<HashSet<String>>>,

    mux: Multiplexer,
    batch: Batch,
    auth_batch: AuthBatch,
    registry: Registry,
    refresh_state: RefreshState,
    internal_calls: HashMap<u64, InternalPurpose>,

    credentials: Value,
    connect_data: Option<Value>,
    client_id: Option<String>,

    reconnect_attempts: u32,
    disconnect_emitted: bool,
    user_disconnected: bool,
    connect_established: bool,
    connect_started_at: Instant,
}

/// A real-time session: connection lifecycle, command multiplexing, subscriptions,
/// batching, and credential refresh behind one handle.
pub struct Session {
    config: Config,
    url: String,
    cmd_tx: Option<mpsc::Sender<SessionCommand>>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<SessionEvent>>,
    event_tx: mpsc::Sender<SessionEvent>,
    task_handle: Option<JoinHandle<()>>,
    ready_state: Arc<AtomicU8>,
    known_channels: Arc<StdMutex<HashSet<String>>>,
}

impl Session {
    pub fn new(url: &str, config: Config) -> Result<Self, SdkError> {
        let kind = transport::classify_url(url).ok_or(SdkError::Ws(WsError::TransportUnavailable))?;
        if !transport_kind_available(kind) {
            return Err(SdkError::Ws(WsError::TransportUnavailable));
        }
        let (event_tx, event_rx) = mpsc::channel(256);
        Ok(Self {
            config,
            url: url.to_string(),
            cmd_tx: None,
            event_rx: tokio::sync::Mutex::new(event_rx),
            event_tx,
            task_handle: None,
            ready_state: Arc::new(AtomicU8::new(ReadyState::Closed as u8)),
            known_channels: Arc::new(StdMutex::new(HashSet::new())),
        })
    }

    pub async fn connect(&mut self) -> Result<(), SdkError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(128);
        self.cmd_tx = Some(cmd_tx);
        self.ready_state.store(ReadyState::Connecting as u8, Ordering::SeqCst);

        let state = SessionState {
            config: self.config.clone(),
            codec: pick_codec(&self.url),
            url: self.url.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
            ready_state: Arc::clone(&self.ready_state),
            known_channels: Arc::clone(&self.known_channels),
            mux: Multiplexer::new(),
            batch: Batch::new(),
            auth_batch: AuthBatch::new(),
            registry: Registry::new(),
            refresh_state: RefreshState::new(),
            internal_calls: HashMap::new(),
            credentials: Value::Null,
            connect_data: None,
            client_id: None,
            reconnect_attempts: 0,
            disconnect_emitted: false,
            user_disconnected: false,
            connect_established: false,
            connect_started_at: Instant::now(),
        };

        let http = HttpClient::new();
        self.task_handle = Some(tokio::spawn(run_task(state, http)));
        Ok(())
    }

    /// Idempotent: disconnecting an already-disconnected session is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), SdkError> {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(SessionCommand::Disconnect).await;
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.cmd_tx = None;
        self.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        self.known_channels.lock().unwrap().clear();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.ready_state.load(Ordering::SeqCst) == ReadyState::Open as u8
    }

    pub fn set_credentials(&self, credentials: Value) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.try_send(SessionCommand::SetCredentials(credentials));
        }
    }

    pub fn set_connect_data(&self, data: Value) {
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.try_send(SessionCommand::SetConnectData(data));
        }
    }

    /// Registers a subscription and fires off the SUBSCRIBE request without waiting
    /// for its reply — the returned handle is usable immediately, and subscription
    /// events arrive later through `handlers`.
    pub fn subscribe(&self, channel: &str, handlers: SubscriptionHandlers) -> Result<SubscriptionHandle, SdkError> {
        if channel.is_empty() {
            return Err(SdkError::Validation("channel name must not be empty".into()));
        }
        if !self.config.resubscribe && !self.is_connected() {
            return Err(SdkError::Ws(WsError::NotConnected));
        }
        let tx = self.cmd_tx.as_ref().ok_or(SdkError::Ws(WsError::NotConnected))?;
        send_try(tx, SessionCommand::Subscribe { channel: channel.to_string(), handlers })?;
        self.known_channels.lock().unwrap().insert(channel.to_string());
        Ok(SubscriptionHandle { cmd_tx: tx.clone(), channel: channel.to_string() })
    }

    pub fn get_sub(&self, channel: &str) -> Option<SubscriptionHandle> {
        let tx = self.cmd_tx.as_ref()?;
        if self.known_channels.lock().unwrap().contains(channel) {
            Some(SubscriptionHandle { cmd_tx: tx.clone(), channel: channel.to_string() })
        } else {
            None
        }
    }

    pub async fn rpc(&self, data: Value) -> Result<Value, SdkError> {
        let tx = self.cmd_tx.as_ref().ok_or(SdkError::Ws(WsError::NotConnected))?.clone();
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SessionCommand::Rpc { data, ack: ack_tx }).await.map_err(|_| SdkError::Ws(WsError::NotConnected))?;
        let (id, rx) = ack_rx.await.map_err(|_| SdkError::Ws(WsError::Disconnected))?;
        let result = multiplexer::await_reply(rx, self.config.timeout()).await;
        if matches!(result, Err(SdkError::Ws(WsError::Timeout))) {
            let _ = tx.try_send(SessionCommand::EvictCall(id));
        }
        result
    }

    /// Fire-and-forget: the server does not correlate a reply to a `send`.
    pub fn send(&self, data: Value) -> Result<(), SdkError> {
        let tx = self.cmd_tx.as_ref().ok_or(SdkError::Ws(WsError::NotConnected))?;
        send_try(tx, SessionCommand::Send { data })
    }

    pub async fn ping(&self) -> Result<(), SdkError> {
        let tx = self.cmd_tx.as_ref().ok_or(SdkError::Ws(WsError::NotConnected))?.clone();
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(SessionCommand::Ping { ack: ack_tx }).await.map_err(|_| SdkError::Ws(WsError::NotConnected))?;
        let (id, rx) = ack_rx.await.map_err(|_| SdkError::Ws(WsError::Disconnected))?;
        let result = multiplexer::await_reply(rx, self.config.timeout()).await;
        if matches!(result, Err(SdkError::Ws(WsError::Timeout))) {
            let _ = tx.try_send(SessionCommand::EvictCall(id));
        }
        result.map(|_| ())
    }

    pub fn start_batching(&self) -> Result<(), SdkError> {
        self.send_control(SessionCommand::StartBatching)
    }

    pub fn stop_batching(&self, flush: bool) -> Result<(), SdkError> {
        self.send_control(SessionCommand::StopBatching { flush })
    }

    pub fn flush(&self) -> Result<(), SdkError> {
        self.send_control(SessionCommand::Flush)
    }

    pub fn start_auth_batching(&self) -> Result<(), SdkError> {
        self.send_control(SessionCommand::StartAuthBatching)
    }

    pub fn stop_auth_batching(&self) -> Result<(), SdkError> {
        self.send_control(SessionCommand::StopAuthBatching)
    }

    fn send_control(&self, cmd: SessionCommand) -> Result<(), SdkError> {
        let tx = self.cmd_tx.as_ref().ok_or(SdkError::Ws(WsError::NotConnected))?;
        send_try(tx, cmd)
    }

    /// A stream of session-scoped events. Borrows `self`.
    pub fn events(&self) -> Pin<Box<dyn futures_util::Stream<Item = SessionEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(&self.event_rx, |rx| async move {
            let mut guard = rx.lock().await;
            guard.recv().await.map(|event| (event, rx))
        }))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ── Background task ────────────────────────────────────────────────────────────

async fn run_task(mut state: SessionState, http: HttpClient) {
    loop {
        if state.user_disconnected {
            return;
        }

        state.ready_state.store(ReadyState::Connecting as u8, Ordering::SeqCst);

        let Some(kind) = transport::classify_url(&state.url) else {
            emit_disconnect_once(&mut state, "transport unavailable for url scheme".into(), false);
            return;
        };

        state.connect_started_at = Instant::now();

        match SessionTransport::connect(kind, &state.url).await {
            Ok(transport) => {
                let reason = run_connected(&mut state, &http, transport).await;

                state.mux.fail_all();
                state.registry.on_transport_lost();
                state.connect_established = false;
                state.ready_state.store(ReadyState::Closed as u8, Ordering::SeqCst);

                match reason {
                    DisconnectReason::UserRequested => return,
                    DisconnectReason::RefreshExhausted => {
                        emit_disconnect_once(&mut state, "credential refresh exhausted".into(), false);
                        return;
                    }
                    DisconnectReason::TransportClosed { reconnect, reason } => {
                        let rate_limited = reason.to_lowercase().contains("rate limit");
                        emit_disconnect_once(&mut state, reason, reconnect);
                        if !reconnect {
                            return;
                        }
                        if !backoff_and_wait(&mut state, &http, rate_limited).await {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("connection attempt failed: {e}");
                emit_disconnect_once(&mut state, e.to_string(), true);
                if !backoff_and_wait(&mut state, &http, false).await {
                    return;
                }
            }
        }
    }
}

fn emit_disconnect_once(state: &mut SessionState, reason: String, reconnect: bool) {
    if state.disconnect_emitted {
        return;
    }
    state.disconnect_emitted = true;
    let _ = state.event_tx.try_send(SessionEvent::Disconnect { reason, reconnect });
}

/// Sleeps out the reconnect backoff, draining (and acting on) any commands the
/// caller sends in the meantime. Returns `false` if the user disconnected during the
/// wait, meaning `run_task` should stop instead of retrying.
async fn backoff_and_wait(state: &mut SessionState, http: &HttpClient, rate_limited: bool) -> bool {
    state.reconnect_attempts += 1;
    let (cap, jitter) = if rate_limited {
        (reconnect::RATE_LIMITED_CAP_MS, reconnect::RATE_LIMITED_JITTER_MAX_MS)
    } else {
        (state.config.retry_cap_ms, reconnect::NORMAL_JITTER_MAX_MS)
    };
    let delay = reconnect::next_delay(state.reconnect_attempts, state.config.retry_base_ms, cap, jitter);

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Disconnect) => {
                        state.user_disconnected = true;
                        return false;
                    }
                    Some(other) => {
                        handle_command(state, http, None, other).await;
                    }
                    None => {
                        state.user_disconnected = true;
                        return false;
                    }
                }
            }
        }
    }
}

async fn run_connected(state: &mut SessionState, http: &HttpClient, mut transport: SessionTransport) -> DisconnectReason {
    let (id, _rx) = state.mux.begin_call();
    state.internal_calls.insert(id, InternalPurpose::Connect);
    let connect_params = serde_json::json!({
        "credentials": state.credentials.clone(),
        "data": state.connect_data.clone(),
    });
    let connect_cmd = Command::new(Some(id), Method::Connect, Some(connect_params));
    if let Err(e) = send_now(state, &mut transport, vec![connect_cmd]) {
        return DisconnectReason::TransportClosed { reconnect: true, reason: e.to_string() };
    }

    let mut ping_interval = tokio::time::interval(state.config.ping_interval());
    ping_interval.reset();

    let far_future = tokio::time::Instant::now() + Duration::from_secs(86_400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);
    let mut pong_armed = false;

    let refresh_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(refresh_sleep);
    let mut refresh_armed = false;

    loop {
        tokio::select! {
            event = transport.events().next() => {
                match event {
                    Some(TransportEvent::Open) => {
                        state.reconnect_attempts = 0;
                    }
                    Some(TransportEvent::Heartbeat) => {
                        if state.connect_established && state.config.ping_enabled {
                            pong_sleep.as_mut().reset(tokio::time::Instant::now() + state.config.pong_wait());
                            pong_armed = true;
                        }
                    }
                    Some(TransportEvent::Message(frame)) => {
                        match state.codec.decode_frame(&frame) {
                            Ok(items) => {
                                if state.connect_established && state.config.ping_enabled {
                                    pong_sleep.as_mut().reset(tokio::time::Instant::now() + state.config.pong_wait());
                                    pong_armed = true;
                                }
                                for item in items {
                                    match handle_incoming(state, http, &mut transport, item).await {
                                        ItemOutcome::Continue => {}
                                        ItemOutcome::Disconnect(reason) => return reason,
                                        ItemOutcome::ArmRefresh(dur) => {
                                            refresh_sleep.as_mut().reset(tokio::time::Instant::now() + dur);
                                            refresh_armed = true;
                                        }
                                        ItemOutcome::RefreshNow => {
                                            refresh_armed = false;
                                            match run_refresh(state, http, &mut transport).await {
                                                RefreshOutcome::Done => {}
                                                RefreshOutcome::Retry(d) => {
                                                    refresh_sleep.as_mut().reset(tokio::time::Instant::now() + d);
                                                    refresh_armed = true;
                                                }
                                                RefreshOutcome::Terminal(reason) => return reason,
                                            }
                                        }
                                    }
                                }
                            }
                            Err(e) => tracing::warn!("frame decode failed: {e}"),
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        tracing::warn!("transport error: {e}");
                    }
                    Some(TransportEvent::Close(reason)) => {
                        if let Some(cb) = &state.config.on_transport_close {
                            cb(None, reason.reason_str());
                        }
                        return close_to_disconnect(reason);
                    }
                    None => {
                        return DisconnectReason::TransportClosed { reconnect: true, reason: "transport stream ended".into() };
                    }
                }
            }

            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if let Some(reason) = handle_command(state, http, Some(&mut transport), cmd).await {
                            return reason;
                        }
                    }
                    None => return DisconnectReason::UserRequested,
                }
            }

            _ = ping_interval.tick(), if state.connect_established && state.config.ping_enabled => {
                let (id, _rx) = state.mux.begin_call();
                let cmd = Command::new(Some(id), Method::Ping, None);
                if let Err(e) = send_now(state, &mut transport, vec![cmd]) {
                    tracing::warn!("heartbeat ping failed: {e}");
                }
            }

            () = &mut pong_sleep, if pong_armed => {
                tracing::warn!("no inbound frame within pong_wait_ms, disconnecting");
                transport.close().await;
                return DisconnectReason::TransportClosed { reconnect: true, reason: "pong timeout".into() };
            }

            () = &mut refresh_sleep, if refresh_armed => {
                refresh_armed = false;
                match run_refresh(state, http, &mut transport).await {
                    RefreshOutcome::Done => {}
                    RefreshOutcome::Retry(d) => {
                        refresh_sleep.as_mut().reset(tokio::time::Instant::now() + d);
                        refresh_armed = true;
                    }
                    RefreshOutcome::Terminal(reason) => return reason,
                }
            }
        }
    }
}

fn close_to_disconnect(reason: CloseReason) -> DisconnectReason {
    let reconnect = reason.reconnect_hint();
    DisconnectReason::TransportClosed { reconnect, reason: reason.reason_str().to_string() }
}

/// Handles one [`SessionCommand`]. `transport` is `None` while the session is
/// reconnecting or has not yet connected — outbound commands fall back to the batch
/// buffer in that case (see [`send_command_batch`]) and are flushed once a CONNECT
/// reply lands. Returns `Some(reason)` only for `Disconnect`, to unwind
/// `run_connected`'s loop.
async fn handle_command(
    state: &mut SessionState,
    http: &HttpClient,
    transport: Option<&mut SessionTransport>,
    cmd: SessionCommand,
) -> Option<DisconnectReason> {
    match cmd {
        SessionCommand::Rpc { data, ack } => {
            let (id, rx) = state.mux.begin_call();
            let command = Command::new(Some(id), Method::Rpc, Some(data));
            if let Err(e) = send_command_batch(state, transport, vec![command]) {
                tracing::warn!("rpc send failed: {e}");
            }
            let _ = ack.send((id, rx));
            None
        }
        SessionCommand::Ping { ack } => {
            let (id, rx) = state.mux.begin_call();
            let command = Command::new(Some(id), Method::Ping, None);
            if let Err(e) = send_command_batch(state, transport, vec![command]) {
                tracing::warn!("ping send failed: {e}");
            }
            let _ = ack.send((id, rx));
            None
        }
        SessionCommand::Send { data } => {
            let command = Command::new(None, Method::Send, Some(data));
            if let Err(e) = send_command_batch(state, transport, vec![command]) {
                tracing::warn!("send failed: {e}");
            }
            None
        }
        SessionCommand::Subscribe { channel, handlers } => {
            state.registry.request_subscribe(&channel, handlers);
            state.known_channels.lock().unwrap().insert(channel);
            drain_and_dispatch_subscriptions(state, http, transport).await;
            None
        }
        SessionCommand::Unsubscribe { channel } => {
            handle_unsubscribe(state, transport, channel);
            None
        }
        SessionCommand::StartBatching => {
            state.batch.start();
            None
        }
        SessionCommand::StopBatching { flush } => {
            let queued = state.batch.stop(flush);
            if flush && !queued.is_empty() {
                if let Some(t) = transport {
                    if let Err(e) = send_now(state, t, queued) {
                        tracing::warn!("batch flush failed: {e}");
                    }
                }
            }
            None
        }
        SessionCommand::Flush => {
            let queued = state.batch.take();
            if !queued.is_empty() {
                if let Some(t) = transport {
                    if let Err(e) = send_now(state, t, queued) {
                        tracing::warn!("flush failed: {e}");
                    }
                }
            }
            None
        }
        SessionCommand::StartAuthBatching => {
            state.auth_batch.start();
            None
        }
        SessionCommand::StopAuthBatching => {
            let channels = state.auth_batch.stop();
            if !channels.is_empty() {
                let items: Vec<(String, Option<String>)> = channels
                    .into_iter()
                    .map(|ch| {
                        let last = state.registry.last_seen(&ch).map(String::from);
                        (ch, last)
                    })
                    .collect();
                authorize_and_subscribe(state, http, transport, items).await;
            }
            None
        }
        SessionCommand::SetCredentials(v) => {
            state.credentials = v;
            None
        }
        SessionCommand::SetConnectData(v) => {
            state.connect_data = Some(v);
            None
        }
        SessionCommand::EvictCall(id) => {
            state.mux.evict(id);
            None
        }
        SessionCommand::Disconnect => {
            state.user_disconnected = true;
            if let Some(t) = transport {
                t.close().await;
            }
            Some(DisconnectReason::UserRequested)
        }
    }
}

/// Sends a batch of commands immediately if connected and not user-batching;
/// otherwise buffers them (the same [`Batch`] used for explicit `start_batching()`
/// doubles as the offline queue, flushed on the next successful CONNECT reply).
fn send_command_batch(
    state: &mut SessionState,
    transport: Option<&mut SessionTransport>,
    cmds: Vec<Command>,
) -> Result<(), SdkError> {
    if cmds.is_empty() {
        return Ok(());
    }
    match transport {
        Some(t) if !state.batch.is_active() => send_now(state, t, cmds),
        _ => {
            for c in cmds {
                state.batch.enqueue(c);
            }
            Ok(())
        }
    }
}

fn send_now(state: &SessionState, transport: &mut SessionTransport, cmds: Vec<Command>) -> Result<(), SdkError> {
    let frame = state.codec.encode_commands(&cmds)?;
    transport.send(frame).map_err(SdkError::Ws)
}

/// Transitions every pending-`New` subscription into `Subscribing` and dispatches it:
/// a direct SUBSCRIBE for an open channel, or a (possibly auth-batched) authorization
/// request first for a private one.
async fn drain_and_dispatch_subscriptions(
    state: &mut SessionState,
    http: &HttpClient,
    mut transport: Option<&mut SessionTransport>,
) {
    let pending = state.registry.begin_subscribing_all_new();
    let mut direct = Vec::new();
    let mut private = Vec::new();

    for (channel, last_seen) in pending {
        if state.config.is_private_channel(&channel) {
            if state.auth_batch.is_active() {
                state.auth_batch.add(&channel);
            } else {
                private.push((channel, last_seen));
            }
        } else {
            direct.push((channel, last_seen));
        }
    }

    if !direct.is_empty() {
        send_subscribe_commands(state, transport.as_deref_mut(), direct);
    }
    if !private.is_empty() {
        authorize_and_subscribe(state, http, transport, private).await;
    }
}

fn send_subscribe_commands(
    state: &mut SessionState,
    transport: Option<&mut SessionTransport>,
    pending: Vec<(String, Option<String>)>,
) {
    let cmds: Vec<Command> =
        pending.into_iter().map(|(ch, last)| build_subscribe_command(state, &ch, last, None, None)).collect();
    if let Err(e) = send_command_batch(state, transport, cmds) {
        tracing::warn!("failed to send subscribe commands: {e}");
    }
}

async fn authorize_and_subscribe(
    state: &mut SessionState,
    http: &HttpClient,
    transport: Option<&mut SessionTransport>,
    channels: Vec<(String, Option<String>)>,
) {
    let names: Vec<String> = channels.iter().map(|(c, _)| c.clone()).collect();
    let client = state.client_id.clone().unwrap_or_default();

    match auth::authorize(&state.config, http, &client, &names).await {
        Ok(response) => {
            let mut cmds = Vec::new();
            for (channel, last_seen) in channels {
                match response.get(&channel) {
                    Some(auth) if auth.status.map_or(true, |s| s == 200) => {
                        cmds.push(build_subscribe_command(state, &channel, last_seen, auth.info.clone(), auth.sign.clone()));
                    }
                    _ => {
                        state.registry.fail_subscription(
                            &channel,
                            ReplyError { code: 403, message: "authorization denied".into() },
                        );
                    }
                }
            }
            if let Err(e) = send_command_batch(state, transport, cmds) {
                tracing::warn!("failed to send authorized subscribe commands: {e}");
            }
        }
        Err(_) => {
            for (channel, _) in channels {
                state.registry.fail_subscription(
                    &channel,
                    ReplyError { code: 0, message: "authorization request failed".into() },
                );
            }
        }
    }
}

fn build_subscribe_command(
    state: &mut SessionState,
    channel: &str,
    last_seen: Option<String>,
    info: Option<Value>,
    sign: Option<String>,
) -> Command {
    let (id, _rx) = state.mux.begin_call();
    state.internal_calls.insert(id, InternalPurpose::Subscribe(channel.to_string()));

    let mut params = serde_json::Map::new();
    params.insert("channel".into(), Value::String(channel.to_string()));
    if let Some(client) = &state.client_id {
        params.insert("client".into(), Value::String(client.clone()));
    }
    if let Some(info) = info {
        params.insert("info".into(), info);
    }
    if let Some(sign) = sign {
        params.insert("sign".into(), Value::String(sign));
    }
    if let Some(last) = last_seen {
        params.insert("recover".into(), Value::Bool(true));
        params.insert("last".into(), Value::String(last));
    }

    Command::new(Some(id), Method::Subscribe, Some(Value::Object(params)))
}

fn handle_unsubscribe(state: &mut SessionState, transport: Option<&mut SessionTransport>, channel: String) {
    let was_known = state.registry.request_unsubscribe(&channel);
    state.known_channels.lock().unwrap().remove(&channel);
    if !was_known {
        return;
    }
    let (id, _rx) = state.mux.begin_call();
    state.internal_calls.insert(id, InternalPurpose::Unsubscribe(channel.clone()));
    let cmd = Command::new(Some(id), Method::Unsubscribe, Some(serde_json::json!({ "channel": channel })));
    if let Err(e) = send_command_batch(state, transport, vec![cmd]) {
        tracing::warn!("failed to send unsubscribe: {e}");
    }
}

async fn handle_incoming(
    state: &mut SessionState,
    http: &HttpClient,
    transport: &mut SessionTransport,
    item: Incoming,
) -> ItemOutcome {
    match item {
        Incoming::Push(push) => {
            handle_push(state, push);
            ItemOutcome::Continue
        }
        Incoming::Reply(reply) => {
            if let Some(purpose) = state.internal_calls.remove(&reply.id) {
                handle_internal_reply(state, http, transport, purpose, &reply).await
            } else {
                state.mux.dispatch_reply(&reply);
                ItemOutcome::Continue
            }
        }
    }
}

fn handle_push(state: &mut SessionState, push: Push) {
    match push.push_type {
        PushType::Publication => {
            state.registry.deliver_publish(&push.channel, parse_publication(&push.data));
        }
        PushType::Join => {
            state.registry.deliver_join(&push.channel, parse_join_leave(&push.data));
        }
        PushType::Leave => {
            state.registry.deliver_leave(&push.channel, parse_join_leave(&push.data));
        }
        PushType::Unsub => {
            state.registry.request_unsubscribe(&push.channel);
            state.known_channels.lock().unwrap().remove(&push.channel);
        }
        PushType::Message => {
            let _ = state.event_tx.try_send(SessionEvent::Message(push.data));
        }
    }
}

fn parse_publication(data: &Value) -> Publication {
    Publication {
        uid: data.get("uid").and_then(|v| v.as_str()).map(String::from),
        data: data.get("data").cloned().unwrap_or(Value::Null),
        info: data.get("info").cloned(),
    }
}

fn parse_join_leave(data: &Value) -> JoinLeaveInfo {
    JoinLeaveInfo {
        client: data.get("client").and_then(|v| v.as_str()).map(String::from),
        user: data.get("user").and_then(|v| v.as_str()).map(String::from),
        info: data.get("info").cloned(),
    }
}

async fn handle_internal_reply(
    state: &mut SessionState,
    http: &HttpClient,
    transport: &mut SessionTransport,
    purpose: InternalPurpose,
    reply: &Reply,
) -> ItemOutcome {
    match purpose {
        InternalPurpose::Connect => handle_connect_reply(state, http, transport, reply).await,
        InternalPurpose::Refresh => handle_refresh_reply(state, reply),
        InternalPurpose::Subscribe(channel) => handle_subscribe_reply(state, channel, reply),
        InternalPurpose::Unsubscribe(channel) => {
            if let Err(e) = multiplexer::reply_to_result(reply) {
                tracing::warn!("unsubscribe {channel} failed: {e}");
            }
            ItemOutcome::Continue
        }
    }
}

async fn handle_connect_reply(
    state: &mut SessionState,
    http: &HttpClient,
    transport: &mut SessionTransport,
    reply: &Reply,
) -> ItemOutcome {
    let result = match multiplexer::reply_to_result(reply) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("CONNECT failed: {e}");
            return ItemOutcome::Disconnect(DisconnectReason::TransportClosed { reconnect: true, reason: e.to_string() });
        }
    };

    state.client_id = result.get("client").and_then(|v| v.as_str()).map(String::from);
    let expired = result.get("expired").and_then(|v| v.as_bool()).unwrap_or(false);
    let ttl = result.get("ttl").and_then(|v| v.as_u64());
    let data = result.get("data").cloned();

    state.connect_established = true;
    state.disconnect_emitted = false;
    state.ready_state.store(ReadyState::Open as u8, Ordering::SeqCst);

    let _ = state.event_tx.try_send(SessionEvent::Connect {
        client: state.client_id.clone().unwrap_or_default(),
        transport: transport.name().to_string(),
        latency: state.connect_started_at.elapsed(),
        data,
    });

    let queued = state.batch.take();
    if !queued.is_empty() {
        if let Err(e) = send_now(state, transport, queued) {
            tracing::warn!("failed to flush queued commands after connect: {e}");
        }
    }

    drain_and_dispatch_subscriptions(state, http, Some(transport)).await;

    if expired {
        ItemOutcome::RefreshNow
    } else if let Some(ttl) = ttl {
        ItemOutcome::ArmRefresh(Duration::from_secs(ttl))
    } else {
        ItemOutcome::Continue
    }
}

fn handle_refresh_reply(state: &mut SessionState, reply: &Reply) -> ItemOutcome {
    match multiplexer::reply_to_result(reply) {
        Ok(result) => {
            state.refresh_state.record_success();
            match result.get("ttl").and_then(|v| v.as_u64()) {
                Some(ttl) => ItemOutcome::ArmRefresh(Duration::from_secs(ttl)),
                None => ItemOutcome::Continue,
            }
        }
        Err(e) => {
            tracing::warn!("REFRESH command failed: {e}");
            ItemOutcome::Continue
        }
    }
}

fn handle_subscribe_reply(state: &mut SessionState, channel: String, reply: &Reply) -> ItemOutcome {
    match multiplexer::reply_to_result(reply) {
        Ok(result) => {
            let recovered = result.get("recovered").and_then(|v| v.as_bool()).unwrap_or(false);
            let publications: Vec<Publication> = result
                .get("publications")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(parse_publication).collect())
                .unwrap_or_default();

            if publications.is_empty() {
                if let Some(last) = result.get("last").and_then(|v| v.as_str()) {
                    state.registry.update_last_seen(&channel, last.to_string());
                }
            }
            state.registry.mark_subscribed(&channel, recovered, publications);
            ItemOutcome::Continue
        }
        Err(SdkError::Ws(WsError::Timeout)) => {
            ItemOutcome::Disconnect(DisconnectReason::TransportClosed { reconnect: true, reason: "subscribe timeout".into() })
        }
        Err(SdkError::Ws(WsError::Server { code, message })) => {
            state.registry.fail_subscription(&channel, ReplyError { code, message });
            ItemOutcome::Continue
        }
        Err(_) => ItemOutcome::Continue,
    }
}

/// Runs the credential refresh procedure once and, if still connected, pushes the new
/// credentials to the server via a REFRESH command.
async fn run_refresh(state: &mut SessionState, http: &HttpClient, transport: &mut SessionTransport) -> RefreshOutcome {
    match refresh::refresh_once(&state.config, http, &state.credentials).await {
        Ok(merged) => {
            state.credentials = merged.clone();
            state.refresh_state.record_success();
            if state.connect_established {
                let (id, _rx) = state.mux.begin_call();
                state.internal_calls.insert(id, InternalPurpose::Refresh);
                let cmd = Command::new(Some(id), Method::Refresh, Some(serde_json::json!({ "credentials": merged })));
                if let Err(e) = send_now(state, transport, vec![cmd]) {
                    tracing::warn!("failed to send REFRESH command: {e}");
                }
            }
            RefreshOutcome::Done
        }
        Err(e) => {
            tracing::warn!("credential refresh failed: {e}");
            state.refresh_state.record_failure();
            if state.refresh_state.exhausted(&state.config) {
                if let Some(cb) = &state.config.on_refresh_failed {
                    cb();
                }
                RefreshOutcome::Terminal(DisconnectReason::RefreshExhausted)
            } else {
                RefreshOutcome::Retry(state.refresh_state.next_retry_delay(&state.config))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_unknown_scheme() {
        let result = Session::new("ftp://example.com", Config::default());
        assert!(matches!(result, Err(SdkError::Ws(WsError::TransportUnavailable))));
    }

    #[test]
    fn test_new_accepts_ws_url() {
        let session = Session::new("ws://localhost:8000/connection", Config::default()).unwrap();
        assert!(!session.is_connected());
    }

    #[test]
    fn test_subscribe_rejects_empty_channel_name() {
        let session = Session::new("ws://localhost:8000/connection", Config::default()).unwrap();
        let result = session.subscribe("", SubscriptionHandlers::new());
        assert!(matches!(result, Err(SdkError::Validation(_))));
    }

    #[test]
    fn test_subscribe_before_connect_fails_without_resubscribe() {
        let mut config = Config::default();
        config.resubscribe = false;
        let session = Session::new("ws://localhost:8000/connection", config).unwrap();
        let result = session.subscribe("news", SubscriptionHandlers::new());
        assert!(matches!(result, Err(SdkError::Ws(WsError::NotConnected))));
    }

    #[test]
    fn test_get_sub_before_connect_is_none() {
        let session = Session::new("ws://localhost:8000/connection", Config::default()).unwrap();
        assert!(session.get_sub("news").is_none());
    }

    #[test]
    fn test_ready_state_cast_roundtrip() {
        assert_eq!(ReadyState::Connecting as u8, 0);
        assert_eq!(ReadyState::Open as u8, 1);
        assert_eq!(ReadyState::Closed as u8, 2);
    }
}
