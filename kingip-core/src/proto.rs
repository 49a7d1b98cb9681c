//! Wire protocol codec.
//!
//! A message is a single type byte, followed by a UTF-8 body, terminated by
//! `0x0A`. Maps are serialized as `key=value;key2=value2` inside the body.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

pub const BYTE_LF: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RelayHello,
    RelayConfig,
    GatewayProxy,
    Ping,
    Success,
    Error,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        match self {
            MessageType::RelayHello => 0x01,
            MessageType::RelayConfig => 0x02,
            MessageType::GatewayProxy => 0x03,
            MessageType::Ping => 0x04,
            MessageType::Success => 0xFE,
            MessageType::Error => 0xFF,
        }
    }

    pub fn from_byte(b: u8) -> CoreResult<Self> {
        match b {
            0x01 => Ok(MessageType::RelayHello),
            0x02 => Ok(MessageType::RelayConfig),
            0x03 => Ok(MessageType::GatewayProxy),
            0x04 => Ok(MessageType::Ping),
            0xFE => Ok(MessageType::Success),
            0xFF => Ok(MessageType::Error),
            _ => Err(CoreError::ProtocolUnknownType),
        }
    }
}

/// A single framed message: type byte + body bytes (no trailing LF, no type
/// byte — both are stripped on decode and re-added on encode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub mtype: MessageType,
    pub body: String,
}

impl Message {
    pub fn new(mtype: MessageType, body: impl Into<String>) -> Self {
        Message { mtype, body: body.into() }
    }

    /// Encode this message to its wire form: `[type][body]0x0A`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.body.len() + 2);
        buf.push(self.mtype.as_byte());
        buf.extend_from_slice(self.body.as_bytes());
        buf.push(BYTE_LF);
        buf
    }

    /// Decode a single frame, including the trailing `0x0A` (the caller's
    /// framed reader strips it via `read_until`, this accepts either form).
    pub fn decode(mut frame: &[u8]) -> CoreResult<Self> {
        if frame.is_empty() {
            return Err(CoreError::ProtocolMalformed);
        }
        if frame.last() == Some(&BYTE_LF) {
            frame = &frame[..frame.len() - 1];
        }
        let mtype = MessageType::from_byte(frame[0])?;
        let body = std::str::from_utf8(&frame[1..]).map_err(|_| CoreError::ProtocolMalformed)?;
        Ok(Message { mtype, body: body.to_string() })
    }

    pub fn unmarshal_map(&self) -> CoreResult<HashMap<String, String>> {
        let mut map = HashMap::new();
        if self.body.is_empty() {
            return Ok(map);
        }
        for part in self.body.split(';') {
            if let Some((k, v)) = part.split_once('=') {
                map.insert(k.to_string(), v.to_string());
            }
        }
        Ok(map)
    }
}

fn marshal_map(data: &HashMap<&str, &str>) -> String {
    data.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

pub fn new_msg_relay_hello(regions: &HashMap<&str, &str>) -> Message {
    Message::new(MessageType::RelayHello, marshal_map(regions))
}

pub fn new_msg_relay_config(id: impl Into<String>) -> Message {
    Message::new(MessageType::RelayConfig, id.into())
}

pub fn new_msg_gateway_proxy(destination: &str, region: &str) -> Message {
    let mut data = HashMap::new();
    data.insert("destination", destination);
    data.insert("region", region);
    Message::new(MessageType::GatewayProxy, marshal_map(&data))
}

pub fn new_msg_ping(id: impl Into<String>) -> Message {
    Message::new(MessageType::Ping, id.into())
}

pub fn new_msg_success() -> Message {
    Message::new(MessageType::Success, "")
}

pub fn new_msg_error(reason: impl Into<String>) -> Message {
    Message::new(MessageType::Error, reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_string_message() {
        let msg = new_msg_relay_config("1234");
        let encoded = msg.encode();
        assert_eq!(encoded, b"\x021234\n");
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.mtype, MessageType::RelayConfig);
        assert_eq!(decoded.body, "1234");
    }

    #[test]
    fn round_trip_map_message() {
        let msg = new_msg_gateway_proxy("example.com:443", "red");
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.mtype, MessageType::GatewayProxy);
        let map = decoded.unmarshal_map().unwrap();
        assert_eq!(map.get("destination").map(String::as_str), Some("example.com:443"));
        assert_eq!(map.get("region").map(String::as_str), Some("red"));
    }

    #[test]
    fn success_message_has_empty_body() {
        let msg = new_msg_success();
        let encoded = msg.encode();
        assert_eq!(encoded, b"\xFE\n");
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.mtype, MessageType::Success);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn unknown_type_byte_rejected() {
        let err = Message::decode(b"\x99hello\n").unwrap_err();
        assert!(matches!(err, CoreError::ProtocolUnknownType));
    }

    #[test]
    fn empty_frame_rejected() {
        let err = Message::decode(b"").unwrap_err();
        assert!(matches!(err, CoreError::ProtocolMalformed));
    }
}
