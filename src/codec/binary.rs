//! Binary (length-delimited) codec dialect, selected by `?format=protobuf` on the
//! session URL (the name is a carry-over convention from the protocol family this
//! client descends from; the wire format here is `bincode`, not actual protobuf).
//!
//! A frame is a sequence of `[u32 little-endian length][bincode-encoded message]`
//! entries concatenated together — the length-delimited framing the spec calls for,
//! so a single WebSocket binary frame can carry a batch of commands or a batch of
//! replies/pushes.

use super::{Codec, Command, Frame, Incoming, Push, Reply};
use crate::error::SdkError;

const LEN_PREFIX_BYTES: usize = 4;

#[derive(serde::Serialize, serde::Deserialize)]
enum WireIncoming {
    Reply(Reply),
    Push(Push),
}

/// Length-delimited `bincode` wire dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn encode_commands(&self, commands: &[Command]) -> Result<Frame, SdkError> {
        if commands.is_empty() {
            return Err(SdkError::Validation("encode_commands: empty batch".into()));
        }
        let mut buf = Vec::new();
        for cmd in commands {
            let encoded = bincode::serialize(cmd)
                .map_err(|e| SdkError::Other(format!("binary encode failed: {e}")))?;
            buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            buf.extend_from_slice(&encoded);
        }
        Ok(Frame::Binary(buf))
    }

    fn decode_frame(&self, frame: &Frame) -> Result<Vec<Incoming>, SdkError> {
        let bytes = match frame {
            Frame::Binary(b) => b.as_slice(),
            Frame::Text(_) => {
                return Err(SdkError::Ws(crate::error::WsError::DeserializationError(
                    "BinaryCodec received a text frame".into(),
                )))
            }
        };

        let mut out = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            if offset + LEN_PREFIX_BYTES > bytes.len() {
                return Err(SdkError::Ws(crate::error::WsError::DeserializationError(
                    "truncated length prefix".into(),
                )));
            }
            let len = u32::from_le_bytes(bytes[offset..offset + LEN_PREFIX_BYTES].try_into().unwrap())
                as usize;
            offset += LEN_PREFIX_BYTES;
            if offset + len > bytes.len() {
                return Err(SdkError::Ws(crate::error::WsError::DeserializationError(
                    "truncated message body".into(),
                )));
            }
            let body = &bytes[offset..offset + len];
            offset += len;

            let msg: WireIncoming = bincode::deserialize(body)
                .map_err(|e| SdkError::Other(format!("binary decode failed: {e}")))?;
            out.push(match msg {
                WireIncoming::Reply(r) => Incoming::Reply(r),
                WireIncoming::Push(p) => Incoming::Push(p),
            });
        }
        Ok(out)
    }
}
