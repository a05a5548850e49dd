//! Engine.IO v4 and Socket.IO v5 text packet codec.
//!
//! Only the text encoding used over a WebSocket transport is implemented.
//! Every WebSocket text frame carries exactly one Engine.IO packet; Socket.IO
//! packets travel inside Engine.IO `message` packets:
//!
//! ```text
//! 0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}   open
//! 2                                                        ping
//! 3                                                        pong
//! 40{"userId":1}                                           connect "/"
//! 42/chat,17["new_message",{"senderId":2}]                 event on "/chat", ack id 17
//! ```

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};

/// The default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session id assigned by the server.
    pub sid: String,
    /// Transports the server offers to upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping, in milliseconds.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// An Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// `0`: session opened.
    Open(Handshake),
    /// `1`: session closed.
    Close,
    /// `2`: heartbeat ping, with optional probe data.
    Ping(String),
    /// `3`: heartbeat pong, echoing the ping data.
    Pong(String),
    /// `4`: a Socket.IO packet.
    Message(String),
    /// `5`: transport upgrade.
    Upgrade,
    /// `6`: no-op.
    Noop,
}

impl EnginePacket {
    /// Decode one WebSocket text frame.
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ChatError::Protocol("empty Engine.IO packet".into()))?;
        let body = chars.as_str();

        match kind {
            '0' => {
                let handshake = serde_json::from_str(body).map_err(|e| {
                    ChatError::Protocol(format!("invalid Engine.IO open packet: {e}"))
                })?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ChatError::Protocol(format!(
                "unknown Engine.IO packet type '{other}'"
            ))),
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                let body = serde_json::to_value(handshake).unwrap_or(Value::Null);
                format!("0{body}")
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

/// A Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0`: connect to a namespace (client) or acknowledge it (server).
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    /// `1`: leave a namespace.
    Disconnect { namespace: String },
    /// `2`: a named event with arguments.
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    /// `3`: acknowledgement of an event.
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    /// `4`: the server refused the namespace connection.
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
    /// `5` or `6`: binary event or ack. Attachments are not supported, so
    /// only the header is kept.
    Binary {
        namespace: String,
        attachments: usize,
        ack: bool,
    },
}

impl SocketPacket {
    /// A `CONNECT` packet carrying `auth`.
    pub fn connect(namespace: impl Into<String>, auth: Value) -> Self {
        Self::Connect {
            namespace: namespace.into(),
            data: Some(auth),
        }
    }

    /// An event with a single payload argument and no ack id.
    pub fn event(namespace: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            namespace: namespace.into(),
            id: None,
            name: name.into(),
            args: vec![payload],
        }
    }

    /// The namespace this packet belongs to.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. }
            | Self::Binary { namespace, .. } => namespace,
        }
    }

    /// Decode the body of an Engine.IO `message` packet.
    pub fn decode(body: &str) -> Result<Self> {
        let kind = body
            .as_bytes()
            .first()
            .copied()
            .ok_or_else(|| ChatError::Protocol("empty Socket.IO packet".into()))?;
        if !kind.is_ascii_digit() {
            return Err(ChatError::Protocol(format!(
                "invalid Socket.IO packet type in '{body}'"
            )));
        }
        let mut rest = &body[1..];

        let attachments = if matches!(kind, b'5' | b'6') {
            let (count, tail) = rest.split_once('-').ok_or_else(|| {
                ChatError::Protocol("binary packet without attachment count".into())
            })?;
            rest = tail;
            count
                .parse()
                .map_err(|_| ChatError::Protocol(format!("invalid attachment count '{count}'")))?
        } else {
            0
        };

        let namespace = if rest.starts_with('/') {
            let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
            rest = tail;
            namespace.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| ChatError::Protocol(format!("invalid ack id '{}'", &rest[..digits])))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest).map_err(|e| {
                ChatError::Protocol(format!("invalid Socket.IO packet data: {e}"))
            })?)
        };

        match kind {
            b'0' => Ok(Self::Connect { namespace, data }),
            b'1' => Ok(Self::Disconnect { namespace }),
            b'2' => {
                let (name, args) = split_event(data)?;
                Ok(Self::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            b'3' => {
                let id = id.ok_or_else(|| ChatError::Protocol("ack without id".into()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    Some(_) => return Err(ChatError::Protocol("ack data is not an array".into())),
                };
                Ok(Self::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            b'4' => Ok(Self::ConnectError { namespace, data }),
            b'5' | b'6' => Ok(Self::Binary {
                namespace,
                attachments,
                ack: kind == b'6',
            }),
            other => Err(ChatError::Protocol(format!(
                "unknown Socket.IO packet type '{}'",
                char::from(other)
            ))),
        }
    }

    /// Encode as the body of an Engine.IO `message` packet.
    pub fn encode(&self) -> String {
        let (kind, id, data) = match self {
            Self::Connect { data, .. } => ('0', None, data.clone()),
            Self::Disconnect { .. } => ('1', None, None),
            Self::Event { id, name, args, .. } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                ('2', *id, Some(Value::Array(array)))
            }
            Self::Ack { id, args, .. } => ('3', Some(*id), Some(Value::Array(args.clone()))),
            Self::ConnectError { data, .. } => ('4', None, data.clone()),
            Self::Binary { ack, .. } => (if *ack { '6' } else { '5' }, None, None),
        };

        let mut out = String::new();
        out.push(kind);
        if let Self::Binary { attachments, .. } = self {
            let _ = write!(out, "{attachments}-");
        }
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            let _ = write!(out, "{id}");
        }
        if let Some(data) = data {
            let _ = write!(out, "{data}");
        }
        out
    }

    /// Wrap into an Engine.IO `message` packet.
    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }
}

/// Human-readable reason carried by a `CONNECT_ERROR` packet.
pub fn connect_error_message(data: Option<&Value>) -> String {
    match data {
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None => "connection refused".to_string(),
    }
}

fn split_event(data: Option<Value>) -> Result<(String, Vec<Value>)> {
    let Some(Value::Array(mut array)) = data else {
        return Err(ChatError::Protocol("event data is not an array".into()));
    };
    if array.is_empty() {
        return Err(ChatError::Protocol("event without a name".into()));
    }
    match array.remove(0) {
        Value::String(name) => Ok((name, array)),
        other => Err(ChatError::Protocol(format!(
            "event name is not a string: {other}"
        ))),
    }
}
