//! HTTP long-polling fallback transport.
//!
//! Selected for `http://`/`https://` session URLs — environments where a persistent
//! WebSocket is unavailable (corporate proxies, some serverless runtimes). There is no
//! teacher precedent for this inside `ws::`; the polling loop is built in the shape of
//! the teacher's `http::client::LightconeHttp::request_with_retry` (reqwest + backoff
//! via `futures_timer::Delay`), reading each response body as one wire frame and
//! posting outbound frames as plain request bodies — the "poll old messages" /
//! "send new commands" split a long-polling session implies.
//!
//! Like [`super::native::NativeTransport`], one `PollingTransport` represents one
//! logical polling session; on a terminal HTTP failure it emits `Close` and stops.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{CloseReason, TransportEvent};
use crate::codec::Frame;
use crate::error::WsError;

const POLL_INTERVAL: Duration = Duration::from_millis(1_000);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

enum Command {
    Send(Frame),
    Close,
}

/// A long-polling connection: periodic GETs for inbound frames, POSTs for outbound
/// ones, against the same base URL.
pub struct PollingTransport {
    cmd_tx: Option<mpsc::Sender<Command>>,
    event_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    event_tx: mpsc::Sender<TransportEvent>,
    task_handle: Option<JoinHandle<()>>,
}

impl PollingTransport {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self { cmd_tx: None, event_rx: Mutex::new(event_rx), event_tx, task_handle: None }
    }

    pub async fn connect(&mut self, url: &str) -> Result<(), WsError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);

        let _ = self.event_tx.try_send(TransportEvent::Open);

        let handle = tokio::spawn(run_polling(
            Arc::new(client),
            url.to_string(),
            cmd_rx,
            self.event_tx.clone(),
        ));
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

    pub fn events(&self) -> std::pin::Pin<Box<dyn futures_util::Stream<Item = TransportEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(&self.event_rx, |rx| async move {
            let mut guard = rx.lock().await;
            guard.recv().await.map(|event| (event, rx))
        }))
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

async fn run_polling(
    client: Arc<Client>,
    url: String,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = post_frame(&client, &url, &frame).await {
                            let _ = event_tx.try_send(TransportEvent::Error(e));
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = event_tx
                            .try_send(TransportEvent::Close(CloseReason::structured("disconnect", false)));
                        return;
                    }
                }
            }

            _ = tokio::time::sleep(POLL_INTERVAL) => {
                match poll_once(&client, &url).await {
                    Ok(Some(frame)) => {
                        consecutive_failures = 0;
                        let _ = event_tx.try_send(TransportEvent::Message(frame));
                    }
                    Ok(None) => {
                        consecutive_failures = 0;
                        let _ = event_tx.try_send(TransportEvent::Heartbeat);
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        let _ = event_tx.try_send(TransportEvent::Error(e));
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            let _ = event_tx.try_send(TransportEvent::Close(
                                CloseReason::structured("poll failures exceeded", true),
                            ));
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn poll_once(client: &Client, url: &str) -> Result<Option<Frame>, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("poll returned status {}", resp.status()));
    }
    let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
    if bytes.is_empty() {
        return Ok(None);
    }
    match std::str::from_utf8(&bytes) {
        Ok(s) => Ok(Some(Frame::Text(s.to_string()))),
        Err(_) => Ok(Some(Frame::Binary(bytes.to_vec()))),
    }
}

async fn post_frame(client: &Client, url: &str, frame: &Frame) -> Result<(), String> {
    let req = match frame {
        Frame::Text(s) => client.post(url).header("content-type", "application/json").body(s.clone()),
        Frame::Binary(b) => {
            client.post(url).header("content-type", "application/octet-stream").body(b.clone())
        }
    };
    let resp = req.send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("send returned status {}", resp.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_no_command_channel() {
        let t = PollingTransport::new();
        assert!(t.cmd_tx.is_none());
    }

    #[test]
    fn test_send_when_not_connected() {
        let t = PollingTransport::new();
        assert!(matches!(t.send(Frame::Text("x".into())), Err(WsError::NotConnected)));
    }
}
