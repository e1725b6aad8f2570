//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (HTTP / WebSocket upgrade)
//!     → http::server (axum serve loop)
//!     → connection.rs (id, tracking, variant-agnostic frame interface)
//!
//! Incoming UDP datagram
//!     → udp.rs (receive loop, JSON parse)
//!     → registered UDP handler
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Both WebSocket handshake variants end up as one `Connection`

pub mod connection;
pub mod udp;

pub use connection::{Connection, ConnectionId, ConnectionTracker, HandshakeVariant};
pub use udp::UdpIngress;
