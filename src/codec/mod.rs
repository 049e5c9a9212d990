//! Codec interface — translates in-memory command/reply/push records to/from wire
//! frames.
//!
//! Two dialects are provided: [`json::JsonCodec`] (text) and [`binary::BinaryCodec`]
//! (length-delimited). Selection happens in `transport::pick` from the session URL's
//! `format=protobuf` query hint, matching the teacher's binary-frame WS config switch
//! (`ws::WsConfig` picks JSON unless told otherwise).

pub mod binary;
pub mod json;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SdkError;

/// A method identifier for an outbound [`Command`].
///
/// The zero/default variant is [`Method::Connect`] — the spec's "a command with
/// method equal to the zero/default value is interpreted as CONNECT (the first
/// outbound command after transport open)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    Connect,
    Refresh,
    Subscribe,
    Unsubscribe,
    Publish,
    Presence,
    History,
    Ping,
    Rpc,
    Send,
}

/// A push type identifier for an inbound [`Push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushType {
    Publication,
    Join,
    Leave,
    Unsub,
    Message,
}

/// An outbound command: `{id?, method, params?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Command {
    pub fn new(id: Option<u64>, method: Method, params: Option<Value>) -> Self {
        Self { id, method, params }
    }

    /// Whether this command expects a correlated reply (all methods except `Send`).
    pub fn expects_reply(&self) -> bool {
        !matches!(self.method, Method::Send)
    }
}

/// A server-supplied `{code, message}` error, attached to a [`Reply`] or [`Push`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyError {
    pub code: i32,
    pub message: String,
}

impl ReplyError {
    pub fn is_timeout(&self) -> bool {
        self.code == 0 && self.message == "timeout"
    }
}

/// A correlated reply: `{id, result?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

/// An uncorrelated server push: `{type, channel, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Push {
    #[serde(rename = "type")]
    pub push_type: PushType,
    pub channel: String,
    pub data: Value,
}

/// One decoded inbound message — a reply (has an id) or a push (does not), the
/// codec-agnostic discriminator named in the wire protocol shape.
#[derive(Debug, Clone)]
pub enum Incoming {
    Reply(Reply),
    Push(Push),
}

/// A wire frame: text for the JSON dialect, bytes for the binary dialect.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Translates in-memory commands/replies/pushes to/from wire frames.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Serializes a non-empty ordered sequence of commands into one frame.
    fn encode_commands(&self, commands: &[Command]) -> Result<Frame, SdkError>;

    /// Parses an inbound frame into an ordered sequence of replies/pushes, preserving
    /// wire order.
    fn decode_frame(&self, frame: &Frame) -> Result<Vec<Incoming>, SdkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_expects_reply() {
        let rpc = Command::new(Some(1), Method::Rpc, None);
        assert!(rpc.expects_reply());
        let send = Command::new(None, Method::Send, None);
        assert!(!send.expects_reply());
    }

    #[test]
    fn test_method_default_is_connect() {
        assert_eq!(Method::default(), Method::Connect);
    }

    #[test]
    fn test_reply_error_is_timeout() {
        let e = ReplyError { code: 0, message: "timeout".into() };
        assert!(e.is_timeout());
        let e2 = ReplyError { code: 100, message: "bad request".into() };
        assert!(!e2.is_timeout());
    }
}
