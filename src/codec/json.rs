//! Text (JSON) codec dialect.
//!
//! A frame is a JSON array. Outbound, each element is a `Command`. Inbound, each
//! element is either a `Reply` (carries `id`) or a `Push` (carries `type`/`channel`);
//! the codec discriminates on the presence of the `id` field, per the wire protocol
//! shape — it never needs to know the concrete command/push type to do so.

use serde_json::Value;

use super::{Codec, Command, Frame, Incoming, Push, Reply};
use crate::error::SdkError;

/// JSON-over-text wire dialect. The default unless `format=protobuf` is requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_commands(&self, commands: &[Command]) -> Result<Frame, SdkError> {
        if commands.is_empty() {
            return Err(SdkError::Validation("encode_commands: empty batch".into()));
        }
        let json = serde_json::to_string(commands)?;
        Ok(Frame::Text(json))
    }

    fn decode_frame(&self, frame: &Frame) -> Result<Vec<Incoming>, SdkError> {
        let text = match frame {
            Frame::Text(s) => s.as_str(),
            Frame::Binary(_) => {
                return Err(SdkError::Ws(crate::error::WsError::DeserializationError(
                    "JsonCodec received a binary frame".into(),
                )))
            }
        };

        let values: Vec<Value> = match serde_json::from_str::<Vec<Value>>(text) {
            Ok(v) => v,
            // A server may also send a single bare object rather than a one-element
            // array; accept both shapes.
            Err(_) => vec![serde_json::from_str::<Value>(text)?],
        };

        let mut out = Vec::with_capacity(values.len());
        for value in values {
            if value.get("id").is_some() {
                let reply: Reply = serde_json::from_value(value)?;
                out.push(Incoming::Reply(reply));
            } else {
                let push: Push = serde_json::from_value(value)?;
                out.push(Incoming::Push(push));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Method, PushType};

    #[test]
    fn test_encode_commands_rejects_empty() {
        let codec = JsonCodec;
        assert!(codec.encode_commands(&[]).is_err());
    }

    #[test]
    fn test_encode_decode_command_roundtrip() {
        let codec = JsonCodec;
        let cmd = Command::new(Some(1), Method::Rpc, Some(serde_json::json!({"op": "echo"})));
        let frame = codec.encode_commands(&[cmd]).unwrap();
        match &frame {
            Frame::Text(s) => assert!(s.contains("\"method\":\"rpc\"")),
            _ => panic!("expected text frame"),
        }
    }

    #[test]
    fn test_decode_frame_mixed_reply_and_push() {
        let codec = JsonCodec;
        let raw = r#"[
            {"id": 1, "result": {"ok": true}},
            {"type": "publication", "channel": "news", "data": {"uid": "u1"}}
        ]"#;
        let frame = Frame::Text(raw.to_string());
        let decoded = codec.decode_frame(&frame).unwrap();
        assert_eq!(decoded.len(), 2);
        match &decoded[0] {
            Incoming::Reply(r) => assert_eq!(r.id, 1),
            _ => panic!("expected reply first"),
        }
        match &decoded[1] {
            Incoming::Push(p) => {
                assert_eq!(p.push_type, PushType::Publication);
                assert_eq!(p.channel, "news");
            }
            _ => panic!("expected push second"),
        }
    }

    #[test]
    fn test_decode_frame_preserves_order() {
        let codec = JsonCodec;
        let raw = r#"[{"id": 2, "result": null}, {"id": 1, "result": null}]"#;
        let frame = Frame::Text(raw.to_string());
        let decoded = codec.decode_frame(&frame).unwrap();
        let ids: Vec<u64> = decoded
            .iter()
            .map(|i| match i {
                Incoming::Reply(r) => r.id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_decode_frame_rejects_binary() {
        let codec = JsonCodec;
        let frame = Frame::Binary(vec![1, 2, 3]);
        assert!(codec.decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_single_bare_object() {
        let codec = JsonCodec;
        let raw = r#"{"id": 5, "result": {"pong": true}}"#;
        let frame = Frame::Text(raw.to_string());
        let decoded = codec.decode_frame(&frame).unwrap();
        assert_eq!(decoded.len(), 1);
    }
}
