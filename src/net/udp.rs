//! UDP datagram ingress.
//!
//! # Responsibilities
//! - Receive datagrams until shutdown
//! - Parse each datagram as one JSON value
//! - Hand it to the single registered UDP handler
//!
//! # Design Decisions
//! - No authentication and no reply: UDP has no back-channel here
//! - Unparseable datagrams are dropped (debug log, counted)
//! - Each dispatch runs in its own task behind a panic boundary

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::routing::{MessageHandler, ReplyChannel};

/// Largest payload an IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

pub struct UdpIngress {
    socket: UdpSocket,
    handler: MessageHandler,
}

impl UdpIngress {
    pub fn new(socket: UdpSocket, handler: MessageHandler) -> Self {
        Self { socket, handler }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Returns when `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.local_addr() {
            tracing::info!(address = %addr, "UDP listener ready");
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("UDP listener stopping");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.dispatch(&buf[..len], peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "UDP receive failed");
                    }
                }
            }
        }
    }

    fn dispatch(&self, datagram: &[u8], peer: SocketAddr) {
        let message: Value = match serde_json::from_slice(datagram) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(remote_addr = %peer, error = %e, "Dropping unparseable datagram");
                metrics::record_udp("dropped");
                return;
            }
        };

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler(message, ReplyChannel::detached()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(()) => metrics::record_udp("dispatched"),
                Err(_) => {
                    tracing::error!(remote_addr = %peer, "UDP handler panicked");
                    metrics::record_udp("panicked");
                }
            }
        });
    }
}
