//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (before any listener accepts):
//!     collector / embedding application
//!     → registry.rs (register_http / register_ws / register_udp)
//!     → Arc<EndpointRegistry> handed to the server
//!
//! Incoming request / upgrade / datagram:
//!     → registry.rs (first match in registration order)
//!     → matcher.rs (exact or pattern path predicate)
//!     → handler(unit, ReplyChannel)
//! ```
//!
//! # Design Decisions
//! - Registry frozen before serving, immutable at runtime
//! - Deterministic: same input always matches same endpoint
//! - First match wins (registration order)

pub mod matcher;
pub mod registry;
pub mod reply;

pub use matcher::PathMatcher;
pub use registry::{
    CloseHandler, Endpoint, EndpointRegistry, Handler, HttpHandler, HttpUnit, MessageHandler,
    Transport, WsHandlers,
};
pub use reply::ReplyChannel;
