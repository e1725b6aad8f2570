mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cube_ingress::auth::signed_request::authorization_header;
use cube_ingress::auth::Strategy;
use cube_ingress::net::ConnectionId;
use cube_ingress::{EndpointRegistry, ReplyChannel};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

fn echo_registry() -> EndpointRegistry {
    let mut registry = EndpointRegistry::new();
    registry.register_ws("/echo", |mut message: Value, reply: ReplyChannel| async move {
        if let Some(object) = message.as_object_mut() {
            object.remove("authorized");
        }
        reply.send(&message);
    });
    registry.register_ws("/whoami", |message: Value, reply: ReplyChannel| async move {
        reply.send(&message["authorized"]);
    });
    registry
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("valid frame");
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn echo_strips_authorization_context() {
    let server = common::start(common::config(Strategy::AllowAll), echo_registry()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/echo")).await.unwrap();

    ws.send(Message::Text(r#"{"foo":1}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"foo": 1}));

    ws.send(Message::Text(r#"{"foo":2}"#.into())).await.unwrap();
    ws.send(Message::Text(r#"{"foo":3}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"foo": 2}));
    assert_eq!(next_json(&mut ws).await, json!({"foo": 3}));

    ws.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn messages_carry_authorization_context() {
    let server = common::start(common::config(Strategy::ReadOnly), echo_registry()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/whoami")).await.unwrap();

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text("[1,2,3]".into())).await.unwrap();
    ws.send(Message::Text(r#"{"authorized":"forged"}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"admin": false}));

    server.stop().await;
}

#[tokio::test]
async fn unregistered_path_is_closed_immediately() {
    let server = common::start(common::config(Strategy::AllowAll), echo_registry()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/nowhere")).await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("closed in time");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_)))),
        "unexpected: {next:?}"
    );
    server.stop().await;
}

#[tokio::test]
async fn rejected_upgrade_gets_403() {
    let server = common::start(common::config(Strategy::SignedRequest), echo_registry()).await;

    match tokio_tungstenite::connect_async(server.ws_url("/echo")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP 403, got {other:?}"),
    }

    let mut request = server.ws_url("/whoami").into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        authorization_header(common::SECRET.as_bytes(), "{}").parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws.send(Message::Text("{}".into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"signed": true}));

    server.stop().await;
}

#[tokio::test]
async fn on_close_fires_once_with_the_connection_channel() {
    let seen: Arc<Mutex<Vec<ConnectionId>>> = Arc::default();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    let mut registry = EndpointRegistry::new();
    let on_message_seen = seen.clone();
    registry.register_ws_with_close(
        "/tracked",
        move |_message: Value, reply: ReplyChannel| {
            on_message_seen.lock().unwrap().push(reply.id());
            async move {
                reply.send(&json!({"ok": true}));
            }
        },
        move |reply: ReplyChannel| {
            let _ = closed_tx.send(reply.id());
            async {}
        },
    );

    let server = common::start(common::config(Strategy::AllowAll), registry).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url("/tracked")).await.unwrap();
    ws.send(Message::Text("{}".into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"ok": true}));
    ws.close(None).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[closed]);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), closed_rx.recv())
            .await
            .map_or(true, |extra| extra.is_none())
    );

    server.stop().await;
}

/// Read an HTTP response head; returns it with any bytes that followed.
async fn read_head(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed during handshake");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(end + 4);
            return (String::from_utf8(buf).unwrap(), rest);
        }
    }
}

async fn read_exact_with(stream: &mut TcpStream, mut have: Vec<u8>, len: usize) -> Vec<u8> {
    while have.len() < len {
        let mut chunk = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed early");
        have.extend_from_slice(&chunk[..n]);
    }
    have
}

#[tokio::test]
async fn legacy_draft75_round_trip() {
    let server = common::start(common::config(Strategy::AllowAll), echo_registry()).await;
    let mut stream = TcpStream::connect(server.http).await.unwrap();

    let request = format!(
        "GET /echo HTTP/1.1\r\nHost: {}\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\nOrigin: http://example.com\r\n\r\n",
        server.http
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let (head, rest) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");
    let lower = head.to_ascii_lowercase();
    assert!(lower.contains("websocket-origin: http://example.com"));
    assert!(lower.contains(&format!("websocket-location: ws://{}/echo", server.http)));
    assert!(rest.is_empty());

    stream.write_all(b"\x00{\"foo\":1}\xff").await.unwrap();
    let expected = b"\x00{\"foo\":1}\xff";
    let frame = read_exact_with(&mut stream, Vec::new(), expected.len()).await;
    assert_eq!(frame.as_slice(), expected);

    stream.write_all(b"\xff\x00").await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn legacy_draft76_answers_challenge() {
    let server = common::start(common::config(Strategy::AllowAll), echo_registry()).await;
    let mut stream = TcpStream::connect(server.http).await.unwrap();

    let request = format!(
        "GET /echo HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nSec-WebSocket-Key2: 12998 5 Y3 1  .P00\r\nSec-WebSocket-Protocol: sample\r\nUpgrade: WebSocket\r\nSec-WebSocket-Key1: 4 @1  46546xW%0l 1 5\r\nOrigin: http://example.com\r\n\r\n^n:ds[4U",
        server.http
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let (head, rest) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");
    assert!(head.to_ascii_lowercase().contains("sec-websocket-protocol: sample"));
    let challenge = read_exact_with(&mut stream, rest, 16).await;
    assert_eq!(&challenge[..16], b"8jKS'y:G*Co,Wxa-");

    stream.write_all(b"\x00{\"bar\":2}\xff").await.unwrap();
    let expected = b"\x00{\"bar\":2}\xff";
    let frame = read_exact_with(&mut stream, challenge[16..].to_vec(), expected.len()).await;
    assert_eq!(frame.as_slice(), expected);

    server.stop().await;
}

#[tokio::test]
async fn legacy_rejection_is_raw_403() {
    let server = common::start(common::config(Strategy::SignedRequest), echo_registry()).await;
    let mut stream = TcpStream::connect(server.http).await.unwrap();
    let request = format!(
        "GET /echo HTTP/1.1\r\nHost: {}\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n",
        server.http
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let (head, _) = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 403"), "{head}");
    assert!(head.to_ascii_lowercase().contains("connection: close"));
    server.stop().await;
}
