//! In-memory connection for driving the clients without a network.
//!
//! `memory_pair` returns a connector to hand to the client and the server end
//! of the same connection. The connector can be used for exactly one
//! `connect`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use sio_client::engine::client::EngineError;
use sio_client::engine::connector::{Connector, Frame, FrameSink, FrameStream};
use tokio::sync::mpsc;

pub const OPEN_NO_KEEP_ALIVE: &str = r#"0{"sid":"test-sid","upgrades":[],"pingInterval":0,"pingTimeout":5000}"#;
pub const OPEN_25S_KEEP_ALIVE: &str =
    r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#;

type ClientHalves = (
    mpsc::UnboundedReceiver<Result<Frame, EngineError>>,
    mpsc::UnboundedSender<Frame>,
);

pub struct MemoryConnector {
    halves: Mutex<Option<ClientHalves>>,
    requested_url: Arc<Mutex<Option<String>>>,
}

pub struct ServerEnd {
    pub to_client: mpsc::UnboundedSender<Result<Frame, EngineError>>,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    requested_url: Arc<Mutex<Option<String>>>,
}

pub fn memory_pair() -> (MemoryConnector, ServerEnd) {
    let (to_client, client_inbound) = mpsc::unbounded_channel();
    let (client_outbound, from_client) = mpsc::unbounded_channel();
    let requested_url = Arc::new(Mutex::new(None));
    (
        MemoryConnector {
            halves: Mutex::new(Some((client_inbound, client_outbound))),
            requested_url: Arc::clone(&requested_url),
        },
        ServerEnd {
            to_client,
            from_client,
            requested_url,
        },
    )
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<(FrameSink, FrameStream), EngineError>> {
        *self.requested_url.lock().expect("url lock") = Some(url.to_string());
        let halves = self.halves.lock().expect("halves lock").take();
        Box::pin(async move {
            let (inbound, outbound) = halves.ok_or(EngineError::ConnectionClosed)?;

            let sink = sink::unfold(outbound, |outbound, frame: Frame| async move {
                outbound
                    .send(frame)
                    .map_err(|_| EngineError::ConnectionClosed)?;
                Ok::<_, EngineError>(outbound)
            });
            let stream = stream::unfold(inbound, |mut inbound| async move {
                inbound.recv().await.map(|item| (item, inbound))
            });

            let sink: FrameSink = Box::pin(sink);
            let stream: FrameStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        self.to_client
            .send(Ok(Frame::Text(text.to_string())))
            .expect("client inbound open");
    }

    pub fn send_frame(&self, frame: Frame) {
        self.to_client.send(Ok(frame)).expect("client inbound open");
    }

    pub fn send_error(&self, error: EngineError) {
        self.to_client.send(Err(error)).expect("client inbound open");
    }

    /// Next text frame from the client, skipping keep-alive PINGs.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.from_client.recv().await? {
                Frame::Text(text) if text == "2" => continue,
                Frame::Text(text) => return Some(text),
                _ => continue,
            }
        }
    }

    /// Every frame the client has written so far, without waiting.
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            if let Frame::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }

    pub fn requested_url(&self) -> Option<String> {
        self.requested_url.lock().expect("url lock").clone()
    }

    /// Whether the client has released its inbound half.
    pub fn client_dropped_inbound(&self) -> bool {
        self.to_client.is_closed()
    }
}
