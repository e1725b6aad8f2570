//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cube_ingress::auth::{Authenticator, Strategy};
use cube_ingress::config::IngressConfig;
use cube_ingress::store::MemoryUserStore;
use cube_ingress::{EndpointRegistry, IngressServer, Shutdown};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

pub const SECRET: &str = "integration-secret";

/// A server running on ephemeral ports.
pub struct TestServer {
    pub http: SocketAddr,
    pub udp: SocketAddr,
    pub shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.http, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Config with the given strategy and the shared test secret.
pub fn config(strategy: Strategy) -> IngressConfig {
    let mut config = IngressConfig::default();
    config.auth.authenticator = strategy;
    config.auth.consumer_secret = Some(SECRET.to_string());
    config.timeouts.shutdown_grace_secs = 1;
    config
}

/// Resolve the authenticator and start serving `registry`.
pub async fn start(config: IngressConfig, registry: EndpointRegistry) -> TestServer {
    let authenticator =
        Authenticator::resolve(&config.auth, Arc::new(MemoryUserStore::new())).unwrap();
    spawn(IngressServer::new(&config, registry, authenticator)).await
}

/// Bind ephemeral TCP and UDP ports and run `server` in the background.
pub async fn spawn(server: IngressServer) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let http = listener.local_addr().unwrap();
    let udp_addr = udp.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let task_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(listener, Some(udp), task_shutdown).await.unwrap();
    });

    TestServer {
        http,
        udp: udp_addr,
        shutdown,
        handle,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
