//! Transport client: connection lifecycle, handshake, and keep-alive.
//!
//! The client owns one connection at a time. `connect` blocks until the
//! server's OPEN packet arrives, then hands the inbound half to a background
//! reader task that answers PINGs, probes the server on the negotiated
//! interval, and forwards MESSAGE/UPGRADE payloads to the installed hooks.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, error, warn};

use crate::engine::connector::{Connector, Frame, FrameSink, FrameStream, WebSocketConnector};
use crate::engine::packet::{EnginePacket, EnginePacketType};
use crate::error::ProtocolError;

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: u8 = 3;

/// Default transport settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EngineDefaults;

impl EngineDefaults {
    pub const PATH: &'static str = "/engine.io";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
}

/// Transport client options.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Server path the transport is mounted on.
    pub path: String,
    /// Upper bound for opening the connection and receiving OPEN.
    pub connect_timeout: Duration,
    /// Runtime the background reader is spawned on. `None` uses the runtime
    /// of the `connect` caller.
    pub runtime: Option<Handle>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            path: EngineDefaults::PATH.to_string(),
            connect_timeout: EngineDefaults::CONNECT_TIMEOUT,
            runtime: None,
        }
    }
}

/// Errors produced by the transport client.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Malformed transport data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection ended before the server sent OPEN.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Operation requires an active connection.
    #[error("not connected")]
    NotConnected,

    /// The underlying connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Opening the connection exceeded the configured timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// Transport connection state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Session parameters announced by the server's OPEN packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub sid: String,
    /// Zero disables client keep-alive probing.
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub upgrades: Vec<String>,
}

impl Handshake {
    /// Parses the JSON payload of an OPEN packet. Intervals are milliseconds
    /// on the wire.
    pub fn from_open_payload(payload: &str) -> Result<Self, ProtocolError> {
        let raw: OpenPayload = serde_json::from_str(payload)?;
        Ok(Self {
            sid: raw.sid,
            ping_interval: Duration::from_millis(raw.ping_interval),
            ping_timeout: Duration::from_millis(raw.ping_timeout),
            upgrades: raw.upgrades,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPayload {
    sid: String,
    ping_interval: u64,
    ping_timeout: u64,
    #[serde(default)]
    upgrades: Vec<String>,
}

/// Callback receiving a MESSAGE or UPGRADE payload.
pub type PacketHook = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone, Default)]
struct PacketHooks {
    on_message: Option<PacketHook>,
    on_upgrade: Option<PacketHook>,
}

/// Hooks shared between the client and the reader of its live connection.
#[derive(Clone, Default)]
struct SharedHooks(Arc<Mutex<PacketHooks>>);

impl SharedHooks {
    fn lock(&self) -> std::sync::MutexGuard<'_, PacketHooks> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_message(&self) -> Option<PacketHook> {
        self.lock().on_message.clone()
    }

    fn on_upgrade(&self) -> Option<PacketHook> {
        self.lock().on_upgrade.clone()
    }
}

#[derive(Default)]
struct KeepAlive {
    handshake: Option<Handshake>,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

/// State shared between the caller and the background reader of one
/// connection.
struct Connection {
    sink: tokio::sync::Mutex<FrameSink>,
    keep_alive: Mutex<KeepAlive>,
    hooks: SharedHooks,
}

impl Connection {
    fn keep_alive(&self) -> std::sync::MutexGuard<'_, KeepAlive> {
        self.keep_alive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, packet: &EnginePacket) -> Result<(), EngineError> {
        debug!(event = "engine_packet_out", packet = %packet);
        self.sink
            .lock()
            .await
            .send(Frame::Text(packet.encode()))
            .await
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.send(&EnginePacket::bare(EnginePacketType::Ping)).await?;
        self.keep_alive().last_ping = Some(Instant::now());
        Ok(())
    }

    fn ping_interval(&self) -> Option<Duration> {
        self.keep_alive()
            .handshake
            .as_ref()
            .map(|handshake| handshake.ping_interval)
            .filter(|interval| !interval.is_zero())
    }

    fn ping_due(&self, now: Instant, interval: Duration) -> bool {
        match self.keep_alive().last_ping {
            Some(last_ping) => now >= last_ping + interval,
            None => true,
        }
    }

    /// Sends a PING when one is due and returns how long the reader may wait
    /// for the next frame. `None` means keep-alive is disabled.
    async fn keep_alive_wait(&self) -> Result<Option<Duration>, EngineError> {
        let Some(interval) = self.ping_interval() else {
            return Ok(None);
        };

        let now = Instant::now();
        if self.ping_due(now, interval) {
            self.ping().await?;
        }

        let last_ping = self.keep_alive().last_ping.unwrap_or(now);
        Ok(Some((last_ping + interval).saturating_duration_since(now)))
    }

    async fn handle_packet(&self, packet: EnginePacket) -> Result<(), EngineError> {
        debug!(event = "engine_packet_in", packet = %packet);
        match packet.packet_type {
            EnginePacketType::Noop => {}
            EnginePacketType::Open => match Handshake::from_open_payload(&packet.data) {
                Ok(handshake) => {
                    self.keep_alive().handshake = Some(handshake);
                }
                Err(err) => warn!(event = "engine_open_malformed", error = %err),
            },
            EnginePacketType::Close => {
                self.keep_alive().handshake = None;
            }
            EnginePacketType::Ping => {
                self.send(&EnginePacket::new(EnginePacketType::Pong, packet.data))
                    .await?;
            }
            // Recorded only; a missed PONG never tears the connection down.
            EnginePacketType::Pong => {
                self.keep_alive().last_pong = Some(Instant::now());
            }
            EnginePacketType::Message => {
                if let Some(hook) = self.hooks.on_message() {
                    hook(packet.data);
                }
            }
            EnginePacketType::Upgrade => {
                if let Some(hook) = self.hooks.on_upgrade() {
                    hook(packet.data);
                }
            }
        }
        Ok(())
    }
}

/// Engine.IO websocket transport client.
pub struct EngineClient {
    url: String,
    options: EngineOptions,
    connector: Arc<dyn Connector>,
    hooks: SharedHooks,
    state: ConnectionState,
    connection: Option<Arc<Connection>>,
    reader: Option<JoinHandle<()>>,
}

impl EngineClient {
    /// Creates a disconnected client for the server at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_options(url, EngineOptions::default())
    }

    pub fn with_options(url: impl Into<String>, options: EngineOptions) -> Self {
        Self {
            url: url.into(),
            options,
            connector: Arc::new(WebSocketConnector),
            hooks: SharedHooks::default(),
            state: ConnectionState::Disconnected,
            connection: None,
            reader: None,
        }
    }

    /// Sets the server path the transport is mounted on.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.options.path = path.into();
        self
    }

    /// Replaces the connector used to open connections.
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Spawns the background reader on `runtime` instead of the caller's
    /// runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.options.runtime = Some(runtime);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Installs the hook receiving MESSAGE payloads. Takes effect for the
    /// next packet, including on a live connection.
    pub fn set_message_hook<F>(&mut self, hook: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.hooks.lock().on_message = Some(Arc::new(hook));
    }

    /// Installs the hook receiving UPGRADE payloads. Takes effect for the
    /// next packet, including on a live connection.
    pub fn set_upgrade_hook<F>(&mut self, hook: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.hooks.lock().on_upgrade = Some(Arc::new(hook));
    }

    /// Full websocket URL including the protocol query string.
    pub fn connection_url(&self) -> String {
        build_connection_url(&self.url, &self.options.path)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Current handshake parameters. Cleared by a CLOSE packet or `close`.
    pub fn handshake(&self) -> Option<Handshake> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.keep_alive().handshake.clone())
    }

    pub fn sid(&self) -> Option<String> {
        self.handshake().map(|handshake| handshake.sid)
    }

    /// When the last PONG arrived.
    pub fn last_pong(&self) -> Option<Instant> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.keep_alive().last_pong)
    }

    /// Whether the background reader is still consuming frames.
    ///
    /// A reader that stopped on a transport failure leaves the client in
    /// `Connected`; this is the only place that reveals it.
    pub fn is_reader_running(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }

    /// Opens the connection and completes the OPEN handshake.
    ///
    /// No-op when already connected. Callers must not run `connect` or
    /// `close` concurrently.
    pub async fn connect(&mut self) -> Result<(), EngineError> {
        if self.is_connected() {
            return Ok(());
        }

        let url = self.connection_url();
        debug!(event = "engine_connecting", url = %url);

        let connector = Arc::clone(&self.connector);
        let hooks = self.hooks.clone();
        let timeout = self.options.connect_timeout;
        // Resets to `Disconnected` on failure or when this future is dropped.
        let attempt = ConnectAttempt::begin(&mut self.state);

        let opened = tokio::time::timeout(timeout, open(connector.as_ref(), &url, hooks)).await;
        let (connection, stream) = match opened {
            Ok(result) => result?,
            Err(_) => return Err(EngineError::Timeout(timeout)),
        };

        let reader = run_reader(Arc::clone(&connection), stream);
        self.reader = Some(match &self.options.runtime {
            Some(runtime) => runtime.spawn(reader),
            None => tokio::spawn(reader),
        });
        self.connection = Some(connection);
        attempt.succeed();
        debug!(event = "engine_connected", sid = ?self.sid());
        Ok(())
    }

    /// Stops the reader, closes the connection, and resets to
    /// `Disconnected`. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            if let Err(err) = reader.await {
                if !err.is_cancelled() {
                    warn!(event = "engine_reader_join_failed", error = %err);
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.sink.lock().await.close().await {
                debug!(event = "engine_close_failed", error = %err);
            }
            debug!(event = "engine_closed");
        }

        self.state = ConnectionState::Disconnected;
    }

    /// Sends a transport packet.
    pub async fn send(&self, packet: EnginePacket) -> Result<(), EngineError> {
        self.active()?.send(&packet).await
    }

    /// Sends a MESSAGE packet carrying `data`.
    pub async fn send_message(&self, data: impl Into<String>) -> Result<(), EngineError> {
        self.send(EnginePacket::message(data)).await
    }

    /// Sends a PING and records the probe time.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.active()?.ping().await
    }

    fn active(&self) -> Result<&Connection, EngineError> {
        match (&self.connection, self.state) {
            (Some(connection), ConnectionState::Connected) => Ok(connection),
            _ => Err(EngineError::NotConnected),
        }
    }
}

impl fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("state", &self.state)
            .field("reader_running", &self.is_reader_running())
            .finish()
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn build_connection_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let path = path.trim_matches('/');
    format!("{base}/{path}/?EIO={ENGINE_IO_VERSION}&transport=websocket")
}

async fn open(
    connector: &dyn Connector,
    url: &str,
    hooks: SharedHooks,
) -> Result<(Arc<Connection>, FrameStream), EngineError> {
    let (mut sink, mut stream) = connector.connect(url).await?;

    let handshake = match recv_handshake(&mut stream).await {
        Ok(handshake) => handshake,
        Err(err) => {
            if let Err(close_err) = sink.close().await {
                debug!(event = "engine_close_failed", error = %close_err);
            }
            return Err(err);
        }
    };

    let connection = Arc::new(Connection {
        sink: tokio::sync::Mutex::new(sink),
        keep_alive: Mutex::new(KeepAlive {
            handshake: Some(handshake),
            ..KeepAlive::default()
        }),
        hooks,
    });
    Ok((connection, stream))
}

/// Tracks `Connecting` for one `connect` call.
struct ConnectAttempt<'a> {
    state: &'a mut ConnectionState,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(state: &'a mut ConnectionState) -> Self {
        *state = ConnectionState::Connecting;
        Self { state }
    }

    fn succeed(self) {
        *self.state = ConnectionState::Connected;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if *self.state == ConnectionState::Connecting {
            *self.state = ConnectionState::Disconnected;
        }
    }
}

async fn recv_handshake(stream: &mut FrameStream) -> Result<Handshake, EngineError> {
    match stream.next().await {
        Some(Ok(Frame::Text(text))) => {
            let packet = EnginePacket::decode(&text)?;
            debug!(event = "engine_packet_in", packet = %packet);
            if packet.packet_type != EnginePacketType::Open {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: EnginePacketType::Open.name(),
                    found: packet.packet_type.name(),
                }
                .into());
            }
            Ok(Handshake::from_open_payload(&packet.data)?)
        }
        Some(Ok(Frame::Binary(_))) => Err(ProtocolError::UnexpectedBinary.into()),
        Some(Ok(Frame::Close)) => Err(EngineError::Handshake(
            "connection closed before OPEN".to_string(),
        )),
        Some(Err(err)) => Err(err),
        None => Err(EngineError::Handshake(
            "connection ended before OPEN".to_string(),
        )),
    }
}

async fn run_reader(connection: Arc<Connection>, mut stream: FrameStream) {
    debug!(event = "engine_reader_started");
    if let Err(err) = read_frames(&connection, &mut stream).await {
        error!(event = "engine_reader_failed", error = %err);
    }
    debug!(event = "engine_reader_stopped");
}

async fn read_frames(connection: &Connection, stream: &mut FrameStream) -> Result<(), EngineError> {
    loop {
        let next = match connection.keep_alive_wait().await? {
            Some(wait) => match tokio::time::timeout(wait, stream.next()).await {
                Ok(next) => next,
                Err(_) => continue,
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(Frame::Text(text))) => match EnginePacket::decode(&text) {
                Ok(packet) => connection.handle_packet(packet).await?,
                Err(err) => warn!(event = "engine_packet_malformed", error = %err),
            },
            Some(Ok(Frame::Binary(bytes))) => {
                warn!(event = "engine_unexpected_frame", kind = "binary", len = bytes.len());
            }
            Some(Ok(Frame::Close)) | None => {
                debug!(event = "engine_peer_closed");
                return Ok(());
            }
            Some(Err(err)) => return Err(err),
        }
    }
}
