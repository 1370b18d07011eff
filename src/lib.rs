//! Websocket client for Engine.IO v3 / Socket.IO v3 servers.
//!
//! The crate is organized by protocol layer:
//! - `engine`: transport framing, handshake, and keep-alive over one
//!   websocket connection.
//! - `socket`: namespaced event session on top of the transport, with
//!   `on`/`once`/`off` listeners and `next_event` awaits.
//! - `error`: wire decode errors shared by both layers.

/// Engine.IO transport client and packet codec.
pub mod engine;
/// Wire decode errors.
pub mod error;
/// Socket.IO session client, listeners, and packet codec.
pub mod socket;

pub use engine::client::{EngineClient, EngineError, EngineOptions};
pub use error::ProtocolError;
pub use socket::client::{connect, SocketClient, SocketError};
pub use socket::listeners::ListenerId;
