use std::fmt;

use crate::error::ProtocolError;

/// Transport packet types, encoded on the wire as a single decimal digit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnginePacketType {
    Open = 0,
    Close = 1,
    Ping = 2,
    Pong = 3,
    Message = 4,
    Upgrade = 5,
    Noop = 6,
}

impl EnginePacketType {
    /// Parses a wire type digit.
    pub fn from_digit(digit: char) -> Result<Self, ProtocolError> {
        match digit {
            '0' => Ok(Self::Open),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    /// Returns the wire digit for this type.
    pub fn as_digit(self) -> char {
        char::from(b'0' + self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Message => "MESSAGE",
            Self::Upgrade => "UPGRADE",
            Self::Noop => "NOOP",
        }
    }
}

impl fmt::Display for EnginePacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single transport-layer packet: type digit followed by a string payload.
///
/// The payload is not escaped. A MESSAGE payload is an embedded session
/// packet string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnginePacket {
    pub packet_type: EnginePacketType,
    pub data: String,
}

impl EnginePacket {
    /// Creates a packet with the given payload.
    pub fn new(packet_type: EnginePacketType, data: impl Into<String>) -> Self {
        Self {
            packet_type,
            data: data.into(),
        }
    }

    /// Creates a packet with an empty payload.
    pub fn bare(packet_type: EnginePacketType) -> Self {
        Self::new(packet_type, String::new())
    }

    pub fn message(data: impl Into<String>) -> Self {
        Self::new(EnginePacketType::Message, data)
    }

    /// Decodes `<digit 0-6><payload>`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let digit = chars.next().ok_or(ProtocolError::Empty)?;
        let packet_type = EnginePacketType::from_digit(digit)?;
        Ok(Self::new(packet_type, chars.as_str()))
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(1 + self.data.len());
        out.push(self.packet_type.as_digit());
        out.push_str(&self.data);
        out
    }
}

impl fmt::Display for EnginePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_empty() {
            write!(f, "{}", self.packet_type)
        } else {
            write!(f, "{} {}", self.packet_type, self.data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_type_and_payload() {
        let packet = EnginePacket::decode("4hello").expect("decode");
        assert_eq!(packet.packet_type, EnginePacketType::Message);
        assert_eq!(packet.data, "hello");
    }

    #[test]
    fn decodes_bare_packet_with_empty_payload() {
        let packet = EnginePacket::decode("2").expect("decode");
        assert_eq!(packet, EnginePacket::bare(EnginePacketType::Ping));
    }

    #[test]
    fn decodes_open_handshake_payload_verbatim() {
        let raw = r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":5000}"#;
        let packet = EnginePacket::decode(raw).expect("decode");
        assert_eq!(packet.packet_type, EnginePacketType::Open);
        assert_eq!(packet.data, &raw[1..]);
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(EnginePacket::decode(""), Err(ProtocolError::Empty)));
    }

    #[test]
    fn rejects_type_outside_range() {
        assert!(matches!(
            EnginePacket::decode("7x"),
            Err(ProtocolError::UnknownType('7'))
        ));
        assert!(matches!(
            EnginePacket::decode("x"),
            Err(ProtocolError::UnknownType('x'))
        ));
    }

    #[test]
    fn encode_then_decode_preserves_every_type() {
        let types = [
            EnginePacketType::Open,
            EnginePacketType::Close,
            EnginePacketType::Ping,
            EnginePacketType::Pong,
            EnginePacketType::Message,
            EnginePacketType::Upgrade,
            EnginePacketType::Noop,
        ];
        for packet_type in types {
            let packet = EnginePacket::new(packet_type, "payload");
            assert_eq!(EnginePacket::decode(&packet.encode()).expect("decode"), packet);
        }
    }

    #[test]
    fn message_encodes_with_digit_prefix() {
        assert_eq!(EnginePacket::message("42[\"a\"]").encode(), "442[\"a\"]");
    }

    #[test]
    fn display_includes_payload_only_when_present() {
        assert_eq!(EnginePacket::bare(EnginePacketType::Pong).to_string(), "PONG");
        assert_eq!(EnginePacket::message("x").to_string(), "MESSAGE x");
    }
}
