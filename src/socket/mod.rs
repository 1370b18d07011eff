//! Socket.IO session layer carried inside transport MESSAGE packets.
//!
//! - `packet`: session packet grammar.
//! - `listeners`: listener registry and dispatch.
//! - `client`: event session over one transport client.

/// Session client, reserved event names, and errors.
pub mod client;
/// Listener registry and dispatch semantics.
pub mod listeners;
/// Session packet codec.
pub mod packet;
