//! Wire-level decode errors shared by the transport and session codecs.

use thiserror::Error;

/// Malformed wire data at either protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The packet string was empty.
    #[error("empty packet")]
    Empty,

    /// The leading type digit is missing or outside `0..=6`.
    #[error("unknown packet type: {0:?}")]
    UnknownType(char),

    /// The packet does not match the session packet grammar.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// A well-formed packet arrived where another type was required.
    #[error("expected {expected} packet, got {found}")]
    UnexpectedPacket {
        expected: &'static str,
        found: &'static str,
    },

    /// A binary frame arrived where a text packet was required.
    #[error("unexpected binary frame")]
    UnexpectedBinary,

    /// Payload JSON could not be parsed.
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}
