//! Connection identity, lifecycle tracking and the WebSocket connection interface.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and reply correlation
//! - Track open connections for graceful shutdown
//! - Hide the two WebSocket handshake variants behind one frame interface
//!
//! # WebSocket States
//! ```text
//! Listening → UpgradeReceived → Authenticating → Accepted → Open → Closed
//!                                              ↘ Rejected
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::AuthorizationContext;

/// Relaxed ordering: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// WebSocket handshake family, chosen from the upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeVariant {
    /// RFC 6455 (`Sec-WebSocket-Version` present).
    Modern,
    /// Hixie draft-75/76.
    Legacy,
}

impl HandshakeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeVariant::Modern => "modern",
            HandshakeVariant::Legacy => "legacy",
        }
    }
}

/// WebSocket connection state, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    UpgradeReceived,
    Authenticating,
    Accepted,
    Rejected,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Inbound half of a WebSocket connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next text message; `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, FrameError>>;
}

/// Outbound half of a WebSocket connection.
#[async_trait]
pub trait FrameWriter: Send {
    async fn send_text(&mut self, text: String) -> Result<(), FrameError>;

    /// Send a close frame (if the variant has one) and flush.
    async fn close(&mut self) -> Result<(), FrameError>;
}

/// An accepted WebSocket connection, independent of handshake variant.
pub struct Connection {
    pub id: ConnectionId,
    pub variant: HandshakeVariant,
    pub remote_addr: Option<SocketAddr>,
    /// Upgrade path, used once to pick the endpoint.
    pub path: String,
    pub authorized: AuthorizationContext,
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("variant", &self.variant)
            .field("remote_addr", &self.remote_addr)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Counts open connections so shutdown can wait for them to drain.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked connection is closed or `grace` elapses.
    /// Returns `true` if the tracker drained in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection untracked");
    }
}
