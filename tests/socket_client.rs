mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use sio_client::engine::client::EngineClient;
use sio_client::socket::client::{SocketClient, CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT};
use sio_client::socket::packet::{SocketPacket, SocketPacketType};
use tokio::time::timeout;

use common::{memory_pair, ServerEnd, OPEN_NO_KEEP_ALIVE};

const WAIT: Duration = Duration::from_secs(2);

async fn connected_client() -> (SocketClient, ServerEnd) {
    let (connector, server) = memory_pair();
    server.send_text(OPEN_NO_KEEP_ALIVE);
    let mut client = SocketClient::new("http://localhost:3000").with_connector(connector);
    client.connect().await.expect("connect");
    (client, server)
}

#[tokio::test]
async fn connects_on_socket_io_path() {
    let (mut client, server) = connected_client().await;

    assert!(client.is_connected());
    assert!(!client.is_namespace_connected());
    assert_eq!(
        server.requested_url().as_deref(),
        Some("ws://localhost:3000/socket.io/?EIO=3&transport=websocket")
    );

    client.close().await;
}

#[tokio::test]
async fn emit_writes_event_inside_message_frame() {
    let (mut client, mut server) = connected_client().await;

    // The server has not sent a session CONNECT yet.
    client
        .emit("hello", [json!("world")])
        .await
        .expect("emit");
    client
        .emit("move", [json!({"x": 1, "y": 2}), json!(3)])
        .await
        .expect("emit");
    client.emit("ping", []).await.expect("emit without args");

    assert_eq!(
        server.recv_text().await.as_deref(),
        Some(r#"42["hello","world"]"#)
    );
    assert_eq!(
        server.recv_text().await.as_deref(),
        Some(r#"42["move",{"x":1,"y":2},3]"#)
    );
    assert_eq!(server.recv_text().await.as_deref(), Some(r#"42["ping"]"#));

    client.close().await;
}

#[tokio::test]
async fn send_packet_writes_raw_session_packet() {
    let (mut client, mut server) = connected_client().await;

    client
        .send_packet(SocketPacket::new(SocketPacketType::Disconnect, None))
        .await
        .expect("send packet");
    assert_eq!(server.recv_text().await.as_deref(), Some("41"));

    client.close().await;
}

#[tokio::test]
async fn inbound_event_reaches_listeners_with_arguments() {
    let (mut client, server) = connected_client().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.on("foo", move |args: &[Value]| {
        sink.lock().expect("lock").push(args.to_vec());
    });

    server.send_text(r#"42["foo",1,2]"#);
    server.send_text(r#"42["bar",3]"#);
    server.send_text(r#"42["foo","x",{"k":null}]"#);

    timeout(WAIT, async {
        while seen.lock().expect("lock").len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("events delivered");

    assert_eq!(
        *seen.lock().expect("lock"),
        vec![
            vec![json!(1), json!(2)],
            vec![json!("x"), json!({"k": null})]
        ]
    );

    client.close().await;
}

#[tokio::test]
async fn session_connect_and_disconnect_fire_reserved_events() {
    let (mut client, server) = connected_client().await;

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    {
        let connects = Arc::clone(&connects);
        client.on(CONNECT_EVENT, move |_: &[Value]| {
            connects.fetch_add(1, Ordering::SeqCst);
        });
        let disconnects = Arc::clone(&disconnects);
        client.on(DISCONNECT_EVENT, move |_: &[Value]| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }

    server.send_text("40");
    let args = timeout(WAIT, client.next_event(CONNECT_EVENT))
        .await
        .expect("connect event")
        .expect("listener kept");
    assert!(args.is_empty());
    assert!(client.is_namespace_connected());
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    server.send_text("41");
    timeout(WAIT, client.next_event(DISCONNECT_EVENT))
        .await
        .expect("disconnect event")
        .expect("listener kept");
    assert!(!client.is_namespace_connected());
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    client.close().await;
}

#[tokio::test]
async fn error_packet_reaches_error_listeners() {
    let (mut client, server) = connected_client().await;

    let waiter = client.next_event(ERROR_EVENT);
    server.send_text(r#"44"Invalid namespace""#);
    let args = timeout(WAIT, waiter)
        .await
        .expect("error event")
        .expect("listener kept");
    assert_eq!(args, vec![json!("Invalid namespace")]);

    client.close().await;
}

#[tokio::test]
async fn next_event_returns_arguments_of_the_next_occurrence() {
    let (mut client, server) = connected_client().await;

    let waiter = client.next_event("y");
    server.send_text(r#"42["y",1,2,3]"#);
    server.send_text(r#"42["y",4]"#);

    let args = timeout(WAIT, waiter)
        .await
        .expect("event arrives")
        .expect("listener kept");
    assert_eq!(args, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(client.listener_count("y"), 0);

    client.close().await;
}

#[tokio::test]
async fn once_listener_fires_for_first_of_three_events() {
    let (mut client, server) = connected_client().await;

    let once_calls = Arc::new(AtomicUsize::new(0));
    let all_calls = Arc::new(AtomicUsize::new(0));
    {
        let once_calls = Arc::clone(&once_calls);
        client.once("z", move |_: &[Value]| {
            once_calls.fetch_add(1, Ordering::SeqCst);
        });
        let all_calls = Arc::clone(&all_calls);
        client.on("z", move |_: &[Value]| {
            all_calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    for _ in 0..3 {
        server.send_text(r#"42["z"]"#);
    }
    timeout(WAIT, async {
        while all_calls.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("events delivered");

    assert_eq!(once_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.listener_count("z"), 1);

    client.close().await;
}

#[tokio::test]
async fn malformed_session_payload_does_not_stop_delivery() {
    let (mut client, server) = connected_client().await;

    let waiter = client.next_event("ok");
    server.send_text("42[not json");
    server.send_text("4");
    server.send_text(r#"42[17]"#);
    server.send_text(r#"43["ack"]"#);
    server.send_text(r#"42["ok",true]"#);

    let args = timeout(WAIT, waiter)
        .await
        .expect("event arrives")
        .expect("listener kept");
    assert_eq!(args, vec![json!(true)]);
    assert!(client.engine().is_reader_running());

    client.close().await;
}

#[tokio::test]
async fn close_resets_namespace_state() {
    let (mut client, server) = connected_client().await;

    server.send_text("40");
    timeout(WAIT, client.next_event(CONNECT_EVENT))
        .await
        .expect("connect event")
        .expect("listener kept");
    assert!(client.is_namespace_connected());

    client.close().await;
    assert!(!client.is_connected());
    assert!(!client.is_namespace_connected());
    assert!(client.emit("late", []).await.is_err());

    client.close().await;
}

#[tokio::test]
async fn wrapping_a_connected_engine_receives_events() {
    let (connector, server) = memory_pair();
    server.send_text(OPEN_NO_KEEP_ALIVE);
    let mut engine = EngineClient::new("http://localhost").with_connector(connector);
    engine.connect().await.expect("connect");

    let mut client = SocketClient::from_engine(engine);
    assert!(client.is_connected());

    let waiter = client.next_event("y");
    server.send_text(r#"42["y",1]"#);
    let args = timeout(WAIT, waiter)
        .await
        .expect("event arrives")
        .expect("listener kept");
    assert_eq!(args, vec![json!(1)]);

    client.close().await;
}
