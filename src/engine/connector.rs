//! Connection abstraction underneath the transport client.
//!
//! A [`Connector`] opens one full-duplex message connection and hands back a
//! boxed sink/stream pair of [`Frame`]s. The transport client never touches
//! the websocket library directly, so tests can drive it over in-memory
//! channels.

use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::engine::client::EngineError;

/// A message on the underlying connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// The peer closed the connection.
    Close,
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = EngineError> + Send>>;

/// Inbound half of a connection. The stream ending means the connection is
/// gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, EngineError>> + Send>>;

/// Opens connections for the transport client.
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection to `url` and splits it into its two halves.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<(FrameSink, FrameStream), EngineError>>;
}

/// Default connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<(FrameSink, FrameStream), EngineError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (socket, _) = connect_async(url).await?;
            let (sink, stream) = socket.split();

            let sink = sink
                .sink_map_err(EngineError::WebSocket)
                .with(|frame: Frame| future::ready(Ok::<_, EngineError>(frame_to_message(frame))));
            let stream = stream.filter_map(|message| {
                future::ready(match message {
                    Ok(message) => message_to_frame(message).map(Ok),
                    Err(err) => Some(Err(EngineError::WebSocket(err))),
                })
            });

            let sink: FrameSink = Box::pin(sink);
            let stream: FrameStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

/// Websocket control frames are answered by tungstenite itself.
fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.to_string())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
