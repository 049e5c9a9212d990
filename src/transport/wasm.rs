//! WASM message-socket transport — `web-sys::WebSocket` + `wasm-bindgen` closures.
//!
//! Generalized from the teacher's `ws::wasm::WsClient`: state lives in `thread_local!`
//! statics since WASM is single-threaded, and the caller supplies an `on_event`
//! callback rather than polling a channel. As with [`super::native::NativeTransport`],
//! reconnection, the ping/pong watchdog, and subscription tracking are session-level
//! concerns and are not implemented here — this type represents one connection
//! attempt and reports its own close, nothing more.

use std::cell::RefCell;

use wasm_bindgen::prelude::*;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

use super::{CloseReason, TransportEvent};
use crate::codec::Frame;
use crate::error::WsError;

thread_local! {
    static WS: RefCell<Option<WebSocket>> = RefCell::new(None);
    static ON_EVENT: RefCell<Option<Box<dyn Fn(TransportEvent)>>> = RefCell::new(None);
}

/// WASM WebSocket transport — unit struct with static methods, state held in
/// `thread_local!` statics.
pub struct WasmTransport;

impl WasmTransport {
    /// Open the socket. `on_event` is invoked for every event on this connection,
    /// including its eventual close.
    pub fn connect(url: &str, on_event: impl Fn(TransportEvent) + 'static) -> Result<(), WsError> {
        ON_EVENT.with(|cb| *cb.borrow_mut() = Some(Box::new(on_event)));

        let ws = WebSocket::new(url).map_err(|e| WsError::ConnectionFailed(extract_js_error(&e)))?;
        Self::setup_connection(ws);
        Ok(())
    }

    pub fn send(frame: Frame) -> Result<(), WsError> {
        WS.with(|ws| match ws.try_borrow() {
            Err(_) => Err(WsError::SendFailed("socket cell borrowed elsewhere".into())),
            Ok(ws_ref) => match ws_ref.as_ref() {
                Some(w) if w.ready_state() == WebSocket::OPEN => {
                    let result = match frame {
                        Frame::Text(s) => w.send_with_str(&s),
                        Frame::Binary(b) => w.send_with_u8_array(&b),
                    };
                    result.map_err(|e| WsError::SendFailed(extract_js_error(&e)))
                }
                _ => Err(WsError::NotConnected),
            },
        })
    }

    pub fn is_connected() -> bool {
        WS.with(|ws| {
            ws.try_borrow()
                .ok()
                .map(|ws_ref| ws_ref.as_ref().map(|w| w.ready_state() == WebSocket::OPEN).unwrap_or(false))
                .unwrap_or(false)
        })
    }

    pub fn close() {
        WS.with(|ws| {
            if let Ok(mut ws_ref) = ws.try_borrow_mut() {
                if let Some(w) = ws_ref.take() {
                    w.set_onopen(None);
                    w.set_onmessage(None);
                    w.set_onerror(None);
                    w.set_onclose(None);
                    let _ = w.close();
                }
            }
        });
        ON_EVENT.with(|cb| *cb.borrow_mut() = None);
    }

    fn emit(event: TransportEvent) {
        ON_EVENT.with(|cb| {
            if let Ok(cb_ref) = cb.try_borrow() {
                if let Some(f) = cb_ref.as_ref() {
                    f(event);
                }
            }
        });
    }

    fn setup_connection(ws: WebSocket) {
        let onopen = Closure::<dyn FnMut()>::new(move || {
            Self::emit(TransportEvent::Open);
        });
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        onopen.forget();

        let onmessage = Closure::<dyn FnMut(_)>::new(move |e: MessageEvent| {
            if let Ok(txt) = e.data().dyn_into::<js_sys::JsString>() {
                let txt: String = txt.into();
                Self::emit(TransportEvent::Message(Frame::Text(txt)));
            } else if let Ok(buf) = e.data().dyn_into::<js_sys::ArrayBuffer>() {
                let bytes = js_sys::Uint8Array::new(&buf).to_vec();
                Self::emit(TransportEvent::Message(Frame::Binary(bytes)));
            }
        });
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();

        let onerror = Closure::<dyn FnMut(_)>::new(move |e: ErrorEvent| {
            Self::emit(TransportEvent::Error(extract_js_error(&e.error())));
        });
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onerror.forget();

        let onclose = Closure::<dyn FnMut(_)>::new(move |e: CloseEvent| {
            let code = e.code();
            let reason = e.reason();
            let reconnect = code != 1000;
            Self::emit(TransportEvent::Close(CloseReason::structured(reason, reconnect)));
        });
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
        onclose.forget();

        WS.with(|cell| *cell.borrow_mut() = Some(ws));
    }
}

fn extract_js_error(err: &JsValue) -> String {
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        let name = error.name().as_string().unwrap_or_else(|| "Error".to_string());
        let message = error.message().as_string().unwrap_or_default();
        return if message.is_empty() { name } else { format!("{name}: {message}") };
    }
    if let Some(s) = err.as_string() {
        if !s.is_empty() {
            return s;
        }
    }
    "unknown WebSocket error".to_string()
}
