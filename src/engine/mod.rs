//! Engine.IO transport layer.
//!
//! - `packet`: single-digit packet framing.
//! - `connector`: connection abstraction and the websocket connector.
//! - `client`: connection lifecycle, handshake, and keep-alive.

/// Transport client and its options and errors.
pub mod client;
/// Connection abstraction underneath the transport client.
pub mod connector;
/// Transport packet codec.
pub mod packet;
