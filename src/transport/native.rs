//! Native message-socket transport — `tokio-tungstenite`.
//!
//! Generalized from the teacher's `ws::native::WsClient`: a background tokio task owns
//! the socket, the public handle talks to it over `mpsc` channels. Unlike the teacher,
//! this type does not reconnect, track subscriptions, or run a ping/pong watchdog
//! itself — those are session-level concerns here (`reconnect.rs`, `subscription.rs`,
//! the heartbeat logic in `session.rs`). One `NativeTransport::connect` is one
//! connection attempt; on close the task exits and the session constructs a fresh
//! transport for the next attempt.

use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{CloseReason, TransportEvent};
use crate::codec::Frame;
use crate::error::WsError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

enum Command {
    Send(Frame),
    Close,
}

/// A single native WebSocket connection attempt.
pub struct NativeTransport {
    cmd_tx: Option<mpsc::Sender<Command>>,
    event_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    event_tx: mpsc::Sender<TransportEvent>,
    task_handle: Option<JoinHandle<()>>,
}

impl NativeTransport {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self { cmd_tx: None, event_rx: Mutex::new(event_rx), event_tx, task_handle: None }
    }

    /// Open the socket. Resolves once the handshake completes or fails; subsequent
    /// events (including the eventual close) arrive through [`NativeTransport::events`].
    pub async fn connect(&mut self, url: &str) -> Result<(), WsError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| WsError::ConnectionFailed("connection timeout".into()))?
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);

        let _ = self.event_tx.try_send(TransportEvent::Open);

        let handle = tokio::spawn(run_connection(sink, stream, cmd_rx, self.event_tx.clone()));
        self.task_handle = Some(handle);
        Ok(())
    }

    pub fn send(&self, frame: Frame) -> Result<(), WsError> {
        match &self.cmd_tx {
            Some(tx) => tx.try_send(Command::Send(frame)).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WsError::SendFailed("command channel full".into()),
                mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
            }),
            None => Err(WsError::NotConnected),
        }
    }

    pub async fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close).await;
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }

    /// A stream of events from this connection. Borrows `self`; drop it before
    /// calling [`NativeTransport::close`].
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(&self.event_rx, |rx| async move {
            let mut guard = rx.lock().await;
            guard.recv().await.map(|event| (event, rx))
        }))
    }
}

impl Default for NativeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

async fn run_connection(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = event_tx.try_send(TransportEvent::Message(Frame::Text(text.to_string())));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = event_tx.try_send(TransportEvent::Message(Frame::Binary(data.into())));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        let reconnect = code != 1000;
                        let _ = event_tx
                            .try_send(TransportEvent::Close(CloseReason::structured(reason, reconnect)));
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx.try_send(TransportEvent::Error(e.to_string()));
                        let _ = event_tx
                            .try_send(TransportEvent::Close(CloseReason::structured(e.to_string(), true)));
                        return;
                    }
                    None => {
                        let _ = event_tx
                            .try_send(TransportEvent::Close(CloseReason::structured("stream ended", true)));
                        return;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            let _ = event_tx.try_send(TransportEvent::Error(e));
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "client disconnect".into(),
                            })))
                            .await;
                        let _ = event_tx
                            .try_send(TransportEvent::Close(CloseReason::structured("disconnect", false)));
                        return;
                    }
                }
            }
        }
    }
}

async fn send_frame(sink: &mut SplitSink<WsStream, Message>, frame: &Frame) -> Result<(), String> {
    let msg = match frame {
        Frame::Text(s) => Message::Text(s.clone().into()),
        Frame::Binary(b) => Message::Binary(b.clone().into()),
    };
    sink.send(msg).await.map_err(|e| e.to_string())
}

fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "no close frame".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_no_command_channel() {
        let t = NativeTransport::new();
        assert!(t.cmd_tx.is_none());
    }

    #[test]
    fn test_send_when_not_connected() {
        let t = NativeTransport::new();
        assert!(matches!(t.send(Frame::Text("x".into())), Err(WsError::NotConnected)));
    }

    #[test]
    fn test_extract_close_with_frame() {
        let frame = CloseFrame { code: CloseCode::Normal, reason: "bye".into() };
        let (code, reason) = extract_close(Some(&frame));
        assert_eq!(code, 1000);
        assert_eq!(reason, "bye");
    }

    #[test]
    fn test_extract_close_no_frame() {
        let (code, reason) = extract_close(None);
        assert_eq!(code, 1006);
        assert_eq!(reason, "no close frame");
    }

    #[tokio::test]
    async fn test_close_when_not_connected() {
        let mut t = NativeTransport::new();
        t.close().await;
    }
}
