//! Socket.IO session client built on one [`EngineClient`].
//!
//! Inbound MESSAGE payloads are decoded as session packets and dispatched to
//! listeners registered with [`SocketClient::on`] / [`SocketClient::once`].
//! Listeners run synchronously on the transport reader task, so they should
//! stay short and hand heavy work off elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::engine::client::{EngineClient, EngineError};
use crate::engine::connector::Connector;
use crate::socket::listeners::{Listener, ListenerId, SharedListeners};
use crate::socket::packet::{SocketPacket, SocketPacketType};

/// Default session settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SocketDefaults;

impl SocketDefaults {
    pub const PATH: &'static str = "/socket.io";
}

/// Reserved event fired on session CONNECT.
pub const CONNECT_EVENT: &str = "connect";
/// Reserved event fired on session DISCONNECT.
pub const DISCONNECT_EVENT: &str = "disconnect";
/// Reserved event fired on session ERROR with the raw error data.
pub const ERROR_EVENT: &str = "error";

/// Errors produced by the session client.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Transport failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// `off` was called with a registration that does not exist.
    #[error("no listener {id:?} registered for event {event:?}")]
    ListenerNotFound { event: String, id: ListenerId },

    /// The listener backing `next_event` was dropped before it fired.
    #[error("listener for event {event:?} dropped before it fired")]
    ListenerDropped { event: String },
}

/// Socket.IO client owning exactly one transport client.
#[derive(Debug)]
pub struct SocketClient {
    engine: EngineClient,
    listeners: SharedListeners,
    namespace_connected: Arc<AtomicBool>,
}

impl SocketClient {
    /// Creates a disconnected client for the server at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_engine(EngineClient::new(url).with_path(SocketDefaults::PATH))
    }

    /// Wraps an existing transport client and installs the session packet
    /// hook on it. The engine may already be connected.
    pub fn from_engine(mut engine: EngineClient) -> Self {
        let listeners = SharedListeners::default();
        let namespace_connected = Arc::new(AtomicBool::new(false));

        let hook_listeners = listeners.clone();
        let hook_connected = Arc::clone(&namespace_connected);
        engine.set_message_hook(move |data| {
            feed_packet(&hook_listeners, &hook_connected, &data);
        });

        Self {
            engine,
            listeners,
            namespace_connected,
        }
    }

    pub fn with_path(self, path: impl Into<String>) -> Self {
        self.map_engine(|engine| engine.with_path(path))
    }

    pub fn with_connector(self, connector: impl Connector) -> Self {
        self.map_engine(|engine| engine.with_connector(connector))
    }

    pub fn with_runtime(self, runtime: Handle) -> Self {
        self.map_engine(|engine| engine.with_runtime(runtime))
    }

    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        self.map_engine(|engine| engine.with_connect_timeout(timeout))
    }

    fn map_engine(self, f: impl FnOnce(EngineClient) -> EngineClient) -> Self {
        let Self {
            engine,
            listeners,
            namespace_connected,
        } = self;
        Self {
            engine: f(engine),
            listeners,
            namespace_connected,
        }
    }

    /// The owned transport client.
    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Whether a session CONNECT has been observed since the last
    /// DISCONNECT or `close`.
    pub fn is_namespace_connected(&self) -> bool {
        self.namespace_connected.load(Ordering::SeqCst)
    }

    /// Connects the transport. No-op when already connected.
    pub async fn connect(&mut self) -> Result<(), SocketError> {
        if !self.engine.is_connected() {
            self.engine.connect().await?;
        }
        Ok(())
    }

    /// Closes the transport. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.engine.close().await;
        self.namespace_connected.store(false, Ordering::SeqCst);
    }

    /// Emits `event` with positional `args`.
    ///
    /// Permitted before the server's session CONNECT has been observed.
    pub async fn emit<I>(&self, event: &str, args: I) -> Result<(), SocketError>
    where
        I: IntoIterator<Item = Value>,
    {
        self.send_packet(SocketPacket::event(event, args)).await
    }

    /// Sends a raw session packet as a transport MESSAGE.
    pub async fn send_packet(&self, packet: SocketPacket) -> Result<(), SocketError> {
        debug!(event = "socket_packet_out", packet = %packet);
        self.engine.send_message(packet.encode()).await?;
        Ok(())
    }

    /// Registers `listener` for `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.lock().add(event, Arc::new(listener), false)
    }

    /// Registers `listener` for the next occurrence of `event` only. It is
    /// unregistered whether or not it panics.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.listeners.lock().add(event, Arc::new(listener), true)
    }

    /// Removes the registration `id` from `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> Result<(), SocketError> {
        if self.listeners.lock().remove(event, id) {
            Ok(())
        } else {
            Err(SocketError::ListenerNotFound {
                event: event.to_string(),
                id,
            })
        }
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().len(event)
    }

    /// Runs the listeners for `event` locally, exactly as an inbound event
    /// would. Returns how many listeners ran.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        self.listeners.dispatch(event, args)
    }

    /// Waits for the next occurrence of `event` and returns its arguments.
    ///
    /// There is no built-in timeout; wrap the call in
    /// `tokio::time::timeout` if one is needed. Dropping the future
    /// unregisters the pending listener.
    pub async fn next_event(&self, event: &str) -> Result<Vec<Value>, SocketError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let listener: Listener = Arc::new(move |args: &[Value]| {
            let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(args.to_vec());
            }
        });

        let id = self.listeners.lock().add(event, listener, true);
        let _guard = PendingListener {
            listeners: &self.listeners,
            event,
            id,
        };

        rx.await.map_err(|_| SocketError::ListenerDropped {
            event: event.to_string(),
        })
    }
}

/// Unregisters a `next_event` listener when the waiting future goes away
/// before the event fired.
struct PendingListener<'a> {
    listeners: &'a SharedListeners,
    event: &'a str,
    id: ListenerId,
}

impl Drop for PendingListener<'_> {
    fn drop(&mut self) {
        self.listeners.lock().remove(self.event, self.id);
    }
}

/// Connects a new client to `url` with default settings.
pub async fn connect(url: impl Into<String>) -> Result<SocketClient, SocketError> {
    let mut client = SocketClient::new(url);
    client.connect().await?;
    Ok(client)
}

fn feed_packet(listeners: &SharedListeners, namespace_connected: &AtomicBool, data: &str) {
    let packet = match SocketPacket::decode(data) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(event = "socket_packet_malformed", error = %err);
            return;
        }
    };

    debug!(event = "socket_packet_in", packet = %packet);
    match packet.packet_type {
        SocketPacketType::Connect => {
            namespace_connected.store(true, Ordering::SeqCst);
            listeners.dispatch(CONNECT_EVENT, &[]);
        }
        SocketPacketType::Disconnect => {
            namespace_connected.store(false, Ordering::SeqCst);
            listeners.dispatch(DISCONNECT_EVENT, &[]);
        }
        SocketPacketType::Event => dispatch_event_packet(listeners, &packet),
        SocketPacketType::Ack => warn!(event = "socket_ack_unsupported", ack_id = ?packet.ack_id),
        SocketPacketType::Error => {
            let data = packet.data.unwrap_or(Value::Null);
            error!(event = "socket_error_packet", data = %data);
            listeners.dispatch(ERROR_EVENT, &[data]);
        }
        SocketPacketType::BinaryEvent | SocketPacketType::BinaryAck => {
            warn!(
                event = "socket_binary_unsupported",
                packet_type = %packet.packet_type,
                attachments = packet.attachments
            );
        }
    }
}

fn dispatch_event_packet(listeners: &SharedListeners, packet: &SocketPacket) {
    match packet.args() {
        Some([Value::String(name), args @ ..]) => {
            listeners.dispatch(name, args);
        }
        Some([]) | None => warn!(event = "socket_event_without_name", packet = %packet),
        Some(_) => warn!(event = "socket_event_name_not_string", packet = %packet),
    }
}
