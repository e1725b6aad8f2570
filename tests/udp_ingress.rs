mod common;

use std::sync::Arc;
use std::time::Duration;

use cube_ingress::auth::Strategy;
use cube_ingress::lifecycle::startup;
use cube_ingress::store::{MemoryEventSink, MemoryUserStore};
use cube_ingress::{EndpointRegistry, ReplyChannel};
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[tokio::test]
async fn datagrams_bypass_authentication() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = EndpointRegistry::new();
    registry.register_udp(move |message: Value, _reply: ReplyChannel| {
        let _ = tx.send(message);
        async {}
    });

    let server = common::start(common::config(Strategy::SignedRequest), registry).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client.send_to(b"{not json", server.udp).await.unwrap();
    client
        .send_to(br#"{"type":"x","values":[1,2,3],"nested":{"ok":true}}"#, server.udp)
        .await
        .unwrap();
    client.send_to(b"42", server.udp).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(message);
    }
    let event = json!({"type": "x", "values": [1, 2, 3], "nested": {"ok": true}});
    assert!(received.contains(&event), "{received:?}");
    assert!(received.contains(&json!(42)), "{received:?}");
    assert!(received.iter().all(|m| m.get("authorized").is_none()));

    server.stop().await;
}

#[tokio::test]
async fn collector_stores_udp_events() {
    let config = common::config(Strategy::AllowAll);
    let sink = Arc::new(MemoryEventSink::new(10));
    let server = startup::build_server(&config, Arc::new(MemoryUserStore::new()), sink.clone()).unwrap();
    let server = common::spawn(server).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(br#"{"type":"ping","data":{"n":1}}"#, server.udp)
        .await
        .unwrap();

    assert!(common::eventually(|| sink.events("ping").len() == 1).await);
    assert_eq!(sink.events("ping")[0], json!({"type": "ping", "data": {"n": 1}}));

    server.stop().await;
}
