use std::fmt;

use serde_json::Value;

use crate::error::ProtocolError;

/// Namespace used when a packet names none.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Session packet types, carried inside transport MESSAGE payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketPacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    Error = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl SocketPacketType {
    pub fn from_digit(digit: char) -> Result<Self, ProtocolError> {
        match digit {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::Error),
            '5' => Ok(Self::BinaryEvent),
            '6' => Ok(Self::BinaryAck),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    pub fn as_digit(self) -> char {
        char::from(b'0' + self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Event => "EVENT",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
            Self::BinaryEvent => "BINARY_EVENT",
            Self::BinaryAck => "BINARY_ACK",
        }
    }
}

impl fmt::Display for SocketPacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded session packet.
///
/// Wire grammar: `<type>[<attachments>-][<namespace>,][<ack id>][<json>]`.
/// EVENT data is a JSON array whose first element is the event name; ERROR
/// data may be any JSON value.
#[derive(Clone, Debug, PartialEq)]
pub struct SocketPacket {
    pub packet_type: SocketPacketType,
    pub data: Option<Value>,
    pub ack_id: Option<u64>,
    pub namespace: String,
    pub attachments: u32,
}

impl SocketPacket {
    pub fn new(packet_type: SocketPacketType, data: Option<Value>) -> Self {
        Self {
            packet_type,
            data,
            ack_id: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            attachments: 0,
        }
    }

    /// Builds an EVENT packet with data `[event, ...args]`.
    pub fn event<I>(event: &str, args: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let data = std::iter::once(Value::String(event.to_string()))
            .chain(args)
            .collect();
        Self::new(SocketPacketType::Event, Some(Value::Array(data)))
    }

    /// Data as a positional sequence, when it is a JSON array.
    pub fn args(&self) -> Option<&[Value]> {
        match &self.data {
            Some(Value::Array(items)) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let digit = chars.next().ok_or(ProtocolError::Empty)?;
        let packet_type = SocketPacketType::from_digit(digit)?;
        let mut rest = chars.as_str();

        let mut attachments = 0;
        let digits = leading_digits(rest);
        if !digits.is_empty() && rest[digits.len()..].starts_with('-') {
            attachments = digits.parse().map_err(|_| {
                ProtocolError::Malformed(format!("attachment count out of range: {digits}"))
            })?;
            rest = &rest[digits.len() + 1..];
        }

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    namespace = rest[..end].to_string();
                    rest = &rest[end + 1..];
                }
                None if !rest.contains(&['[', '{', '"'][..]) => {
                    namespace = rest.to_string();
                    rest = "";
                }
                None => {
                    return Err(ProtocolError::Malformed(format!(
                        "unterminated namespace in {text:?}"
                    )));
                }
            }
        }

        let mut ack_id = None;
        let digits = leading_digits(rest);
        if !digits.is_empty() {
            ack_id = Some(digits.parse().map_err(|_| {
                ProtocolError::Malformed(format!("ack id out of range: {digits}"))
            })?);
            rest = &rest[digits.len()..];
        }

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            packet_type,
            data,
            ack_id,
            namespace,
            attachments,
        })
    }

    /// Encodes the type digit and, when present and non-empty, the JSON data.
    ///
    /// Namespace, ack id, and attachment count are never written.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.packet_type.as_digit());
        if let Some(data) = self.data.as_ref().filter(|data| !is_empty_json(data)) {
            out.push_str(&data.to_string());
        }
        out
    }
}

impl fmt::Display for SocketPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.as_ref().filter(|data| !is_empty_json(data)) {
            Some(data) => write!(f, "{} {}", self.packet_type, data),
            None => write!(f, "{}", self.packet_type),
        }
    }
}

fn leading_digits(text: &str) -> &str {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    &text[..end]
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}
