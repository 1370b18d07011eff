use std::error::Error;
use std::time::Duration;

use serde_json::{json, Value};
use sio_client::socket::client::{SocketClient, CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut client = SocketClient::new(url);
        client.on(CONNECT_EVENT, |_: &[Value]| println!("session connected"));
        client.on(DISCONNECT_EVENT, |_: &[Value]| println!("session disconnected"));
        client.on(ERROR_EVENT, |args: &[Value]| println!("server error: {args:?}"));
        client.on("chat message", |args: &[Value]| {
            if let Some(text) = args.first().and_then(Value::as_str) {
                println!("< {text}");
            }
        });
        client.connect().await?;

        client.emit("chat message", [json!("hello from rust")]).await?;

        match tokio::time::timeout(Duration::from_secs(30), client.next_event("chat message"))
            .await
        {
            Ok(args) => println!("first reply: {:?}", args?),
            Err(_) => println!("no reply within 30s"),
        }

        client.close().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
