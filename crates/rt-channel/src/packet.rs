//! Text-frame codec for Engine.IO v3 carrying Socket.IO protocol v4 packets.
//!
//! A websocket text frame is one Engine.IO packet: a type digit followed by
//! its data. Message packets (`4`) wrap a Socket.IO packet laid out as
//! `<type>[/<namespace>,][<ack id>][<json>]`.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        event: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    Error {
        namespace: String,
        data: Value,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),
    #[error("binary socket packets are not supported")]
    Binary,
    #[error("invalid packet json: {0}")]
    Json(String),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

pub fn decode(frame: &str) -> Result<EnginePacket, PacketError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();
    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|err| PacketError::Json(err.to_string())),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(PacketError::UnknownEngineType(other)),
    }
}

fn decode_socket(input: &str) -> Result<SocketPacket, PacketError> {
    let mut chars = input.chars();
    let kind = chars.next().ok_or(PacketError::Malformed("missing socket packet type"))?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let namespace = &rest[..end];
        rest = rest.get(end + 1..).unwrap_or("");
        namespace.to_string()
    } else {
        DEFAULT_NAMESPACE.to_string()
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|_| PacketError::Malformed("ack id out of range"))?,
        )
    } else {
        None
    };
    let body = &rest[digits..];
    let data = if body.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(body).map_err(|err| PacketError::Json(err.to_string()))?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect { namespace }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut items = match data {
                Some(Value::Array(items)) => items,
                _ => return Err(PacketError::Malformed("event data must be an array")),
            };
            if items.is_empty() {
                return Err(PacketError::Malformed("event without a name"));
            }
            let event = match items.remove(0) {
                Value::String(name) => name,
                _ => return Err(PacketError::Malformed("event name must be a string")),
            };
            Ok(SocketPacket::Event {
                namespace,
                id,
                event,
                args: items,
            })
        }
        '3' => {
            let id = id.ok_or(PacketError::Malformed("ack without id"))?;
            let args = match data {
                Some(Value::Array(items)) => items,
                None => Vec::new(),
                Some(_) => return Err(PacketError::Malformed("ack data must be an array")),
            };
            Ok(SocketPacket::Ack {
                namespace,
                id,
                args,
            })
        }
        '4' => Ok(SocketPacket::Error {
            namespace,
            data: data.unwrap_or(Value::Null),
        }),
        '5' | '6' => Err(PacketError::Binary),
        other => Err(PacketError::UnknownSocketType(other)),
    }
}

pub fn encode(packet: &EnginePacket) -> Result<String, PacketError> {
    match packet {
        EnginePacket::Open(_) => Err(PacketError::Malformed("open is server-only")),
        EnginePacket::Close => Ok("1".to_string()),
        EnginePacket::Ping(data) => Ok(format!("2{data}")),
        EnginePacket::Pong(data) => Ok(format!("3{data}")),
        EnginePacket::Message(socket) => encode_socket(socket).map(|body| format!("4{body}")),
        EnginePacket::Upgrade => Ok("5".to_string()),
        EnginePacket::Noop => Ok("6".to_string()),
    }
}

fn encode_socket(packet: &SocketPacket) -> Result<String, PacketError> {
    let (kind, namespace, id, data) = match packet {
        SocketPacket::Connect { namespace } => ('0', namespace, None, None),
        SocketPacket::Disconnect { namespace } => ('1', namespace, None, None),
        SocketPacket::Event {
            namespace,
            id,
            event,
            args,
        } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(event.clone()));
            items.extend(args.iter().cloned());
            ('2', namespace, *id, Some(Value::Array(items)))
        }
        SocketPacket::Ack {
            namespace,
            id,
            args,
        } => ('3', namespace, Some(*id), Some(Value::Array(args.clone()))),
        SocketPacket::Error { namespace, data } => ('4', namespace, None, Some(data.clone())),
    };

    let mut out = String::new();
    out.push(kind);
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }
    if let Some(id) = id {
        out.push_str(&id.to_string());
    }
    if let Some(data) = data {
        let json = serde_json::to_string(&data).map_err(|err| PacketError::Json(err.to_string()))?;
        out.push_str(&json);
    }
    Ok(out)
}
